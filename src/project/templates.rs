//! Template registry: the allow-list of live demo pages and their seed
//! sources.
//!
//! Only pages on this list may ever be read or edited — a project id with
//! an unknown slug never reaches the store.

/// One marketplace template with a live, editable demo page.
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub slug: &'static str,
    /// Relative path of the editable page source inside the project.
    pub file_path: &'static str,
    pub seed: &'static str,
}

pub const LIVE_PAGES: &[Template] = &[
    Template {
        slug: "medtrack",
        file_path: "app/live/medtrack/page.tsx",
        seed: MEDTRACK_SEED,
    },
    Template {
        slug: "barberly",
        file_path: "app/live/barberly/page.tsx",
        seed: BARBERLY_SEED,
    },
    Template {
        slug: "crmflow",
        file_path: "app/live/crmflow/page.tsx",
        seed: CRMFLOW_SEED,
    },
];

/// Whether `slug` names a live page that may be read/edited.
pub fn is_live_page_slug(slug: &str) -> bool {
    LIVE_PAGES.iter().any(|t| t.slug == slug)
}

pub fn template_for(slug: &str) -> Option<&'static Template> {
    LIVE_PAGES.iter().find(|t| t.slug == slug)
}

const MEDTRACK_SEED: &str = r#""use client";

import { useState } from "react";

export default function MedtrackPage() {
  const [patient, setPatient] = useState("");
  const [slot, setSlot] = useState("09:00");

  return (
    <main className="min-h-screen bg-slate-50 p-8">
      <h1 className="text-3xl font-semibold text-slate-900">MedTrack</h1>
      <p className="mt-2 text-slate-600">Book a check-up in seconds.</p>
      <form className="mt-6 max-w-md space-y-4">
        <input
          className="w-full rounded-lg border border-slate-300 px-4 py-2"
          placeholder="Patient name"
          value={patient}
          onChange={(e) => setPatient(e.target.value)}
        />
        <select
          className="w-full rounded-lg border border-slate-300 px-4 py-2"
          value={slot}
          onChange={(e) => setSlot(e.target.value)}
        >
          <option>09:00</option>
          <option>11:30</option>
          <option>14:00</option>
        </select>
        <button className="rounded-lg bg-sky-500 px-4 py-2 font-medium text-white">
          Book appointment
        </button>
      </form>
    </main>
  );
}
"#;

const BARBERLY_SEED: &str = r#""use client";

import { useState } from "react";

const SERVICES = ["Classic cut", "Beard trim", "Hot towel shave"];

export default function BarberlyPage() {
  const [service, setService] = useState(SERVICES[0]);

  return (
    <main className="min-h-screen bg-zinc-950 p-8 text-zinc-100">
      <h1 className="text-3xl font-bold tracking-tight">Barberly</h1>
      <p className="mt-2 text-zinc-400">Walk-ins welcome. Legends preferred.</p>
      <div className="mt-6 flex gap-3">
        {SERVICES.map((s) => (
          <button
            key={s}
            onClick={() => setService(s)}
            className="rounded-full border border-amber-500 px-4 py-2 text-amber-400"
          >
            {s}
          </button>
        ))}
      </div>
      <p className="mt-4 text-sm text-zinc-500">Selected: {service}</p>
      <button className="mt-6 rounded-lg bg-amber-500 px-6 py-3 font-semibold text-zinc-950">
        Reserve chair
      </button>
    </main>
  );
}
"#;

const CRMFLOW_SEED: &str = r#""use client";

import { useState } from "react";

const STAGES = ["Lead", "Qualified", "Proposal", "Won"];

export default function CrmflowPage() {
  const [deals, setDeals] = useState([
    { name: "Acme renewal", stage: "Qualified" },
    { name: "Globex onboarding", stage: "Lead" },
  ]);

  return (
    <main className="min-h-screen bg-white p-8">
      <h1 className="text-3xl font-semibold text-gray-900">CRM Flow</h1>
      <div className="mt-6 grid grid-cols-4 gap-4">
        {STAGES.map((stage) => (
          <section key={stage} className="rounded-xl bg-gray-100 p-4">
            <h2 className="text-sm font-medium uppercase text-gray-500">{stage}</h2>
            {deals
              .filter((d) => d.stage === stage)
              .map((d) => (
                <article key={d.name} className="mt-3 rounded-lg bg-white p-3 shadow-sm">
                  {d.name}
                </article>
              ))}
          </section>
        ))}
      </div>
    </main>
  );
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_gates_slugs() {
        assert!(is_live_page_slug("medtrack"));
        assert!(!is_live_page_slug("medtrack2"));
        assert!(!is_live_page_slug(""));
    }

    #[test]
    fn seeds_live_under_safe_relative_paths() {
        for template in LIVE_PAGES {
            assert!(crate::patch::check_safe_path(template.file_path).is_ok());
            assert!(!template.seed.is_empty());
        }
    }
}
