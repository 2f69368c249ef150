//! Live preview synchronization.
//!
//! The daemon runs a small WebSocket relay on a dedicated port. The editor
//! host and the preview iframe bridge both connect to it and exchange typed
//! envelopes: visual-edit mode toggles, element selections, in-place patch
//! payloads, and full-reload requests. The daemon itself injects envelopes
//! after a patch batch is applied to disk.

pub mod event;

use crate::locator::SelectionHint;
use crate::patch::engine::AppliedChange;
use crate::AppContext;
use anyhow::Result;
use event::{EventBroadcaster, DAEMON_SOURCE};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

// ─── Envelopes ───────────────────────────────────────────────────────────────

/// Messages exchanged over the sync socket.
///
/// Every frame is a JSON object whose `type` field carries an `ISLA_`-prefixed
/// discriminator. Frames with an unknown discriminator are logged and dropped,
/// never relayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SyncEnvelope {
    /// Toggle visual-edit mode in the preview overlay.
    #[serde(rename = "ISLA_VISUAL_EDIT")]
    VisualEdit { enabled: bool },

    /// The preview reported a DOM element selection.
    #[serde(rename = "ISLA_ELEMENT_SELECTED")]
    ElementSelected { hint: SelectionHint },

    /// A patch batch was applied to disk; the preview may patch its DOM
    /// in place instead of waiting for a dev-server rebuild.
    #[serde(rename = "ISLA_APPLY_PATCH")]
    ApplyPatch { changes: Vec<AppliedChange> },

    /// Ask the preview to reload. `version` is a monotonic counter so the
    /// bridge can ignore reloads it has already performed.
    #[serde(rename = "ISLA_RELOAD")]
    Reload { version: u64 },

    /// Daemon lifecycle and patch notifications (daemon.ready,
    /// patch.applied, patch.undone, patch.redone).
    #[serde(rename = "ISLA_EVENT")]
    Event {
        method: String,
        params: serde_json::Value,
    },
}

// ─── Fan-out hub ─────────────────────────────────────────────────────────────

/// Shared handle for pushing envelopes to every connected sync peer.
pub struct PreviewSync {
    broadcaster: EventBroadcaster,
    preview_version: AtomicU64,
    settle_delay: Duration,
}

impl PreviewSync {
    pub fn new(settle_delay_ms: u64) -> Self {
        Self {
            broadcaster: EventBroadcaster::new(),
            preview_version: AtomicU64::new(0),
            settle_delay: Duration::from_millis(settle_delay_ms),
        }
    }

    /// Serialize and broadcast an envelope originated by the daemon.
    pub fn send(&self, envelope: &SyncEnvelope) {
        match serde_json::to_string(envelope) {
            Ok(json) => self.broadcaster.broadcast(DAEMON_SOURCE, json),
            Err(e) => error!(err = %e, "envelope serialization failed"),
        }
    }

    /// Broadcast a lifecycle notification.
    pub fn notify(&self, method: &str, params: serde_json::Value) {
        self.send(&SyncEnvelope::Event {
            method: method.to_string(),
            params,
        });
    }

    /// Decide how a just-applied batch reaches the preview.
    ///
    /// A batch where at least one change could be mirrored structurally in
    /// the DOM is forwarded as an in-place patch; everything else falls back
    /// to a versioned reload. Exactly one envelope is produced per batch, so
    /// a reload is never sent alongside a patch for the same apply.
    pub fn plan_fanout(&self, changes: &[AppliedChange]) -> SyncEnvelope {
        if changes.iter().any(AppliedChange::preview_patchable) {
            SyncEnvelope::ApplyPatch {
                changes: changes.to_vec(),
            }
        } else {
            SyncEnvelope::Reload {
                version: self.bump_preview_version(),
            }
        }
    }

    /// Advance the reload counter and return the new value.
    pub fn bump_preview_version(&self) -> u64 {
        self.preview_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Announce an applied batch to the preview after the settle delay.
    ///
    /// The delay gives the dev server's file watcher a head start so the
    /// preview does not patch a DOM that is about to be replaced anyway.
    pub fn announce_apply(self: &Arc<Self>, changes: Vec<AppliedChange>) {
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(sync.settle_delay).await;
            let envelope = sync.plan_fanout(&changes);
            debug!(
                kind = match envelope {
                    SyncEnvelope::ApplyPatch { .. } => "patch",
                    _ => "reload",
                },
                count = changes.len(),
                "announcing applied batch"
            );
            sync.send(&envelope);
        });
    }

    /// Current reload counter value.
    pub fn preview_version(&self) -> u64 {
        self.preview_version.load(Ordering::SeqCst)
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }
}

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.sync_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "sync server listening");

    ctx.sync.notify(
        "daemon.ready",
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "port": ctx.config.port,
            "syncPort": ctx.config.sync_port,
        }),
    );

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    // Pinned so we can use it in the select! loop without moving.
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    let mut next_peer_id: u64 = 1;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping sync server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                let peer_id = next_peer_id;
                next_peer_id += 1;
                debug!(peer = %peer, peer_id, "new sync connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx, peer_id).await {
                        warn!(peer = %peer, err = %e, "sync connection error");
                    }
                });
            }
        }
    }

    info!("sync server stopped");
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    ctx: Arc<AppContext>,
    peer_id: u64,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    let mut broadcast_rx = ctx.sync.broadcaster().subscribe();

    loop {
        tokio::select! {
            // Incoming envelope from this peer — validate, then relay to the others
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<SyncEnvelope>(&text) {
                            Ok(envelope) => {
                                if let SyncEnvelope::ElementSelected { hint } = &envelope {
                                    debug!(peer_id, tag = %hint.tag, "element selected");
                                }
                                ctx.sync.broadcaster().broadcast(peer_id, text);
                            }
                            Err(e) => {
                                warn!(peer_id, err = %e, "dropping unrecognized sync frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(peer_id, err = %e, "ws error");
                        break;
                    }
                    _ => {}
                }
            }
            // Outgoing envelope from the daemon or another peer
            event = broadcast_rx.recv() => {
                match event {
                    Ok((source, json)) => {
                        if source == peer_id {
                            continue;
                        }
                        if let Err(e) = sink.send(Message::Text(json)).await {
                            warn!(peer_id, err = %e, "broadcast send error");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(peer_id, skipped = n, "broadcast lagged");
                    }
                }
            }
        }
    }
    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchChange;

    fn applied(change: PatchChange, source_patched: bool) -> AppliedChange {
        AppliedChange {
            change,
            source_patched,
        }
    }

    fn snippet_change() -> PatchChange {
        PatchChange::ReplaceSnippet {
            file_path: "app/live/medtrack/page.tsx".into(),
            snippet: "bg-sky-500".into(),
            content: "bg-emerald-500".into(),
            description: Some("recolor".into()),
        }
    }

    fn whole_file_change() -> PatchChange {
        PatchChange::Replace {
            file_path: "app/live/medtrack/page.tsx".into(),
            content: "export default function Page() { return null }".into(),
            description: None,
        }
    }

    #[test]
    fn envelope_round_trip() {
        let env = SyncEnvelope::VisualEdit { enabled: true };
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"ISLA_VISUAL_EDIT\""));
        let back: SyncEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn reload_envelope_carries_version() {
        let json = serde_json::to_string(&SyncEnvelope::Reload { version: 7 }).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "ISLA_RELOAD");
        assert_eq!(v["version"], 7);
    }

    #[test]
    fn unknown_discriminator_rejected() {
        let err = serde_json::from_str::<SyncEnvelope>(r#"{"type":"ISLA_BOGUS","x":1}"#);
        assert!(err.is_err());
    }

    #[test]
    fn missing_type_rejected() {
        assert!(serde_json::from_str::<SyncEnvelope>(r#"{"enabled":true}"#).is_err());
    }

    #[test]
    fn patchable_batch_becomes_apply_patch() {
        let sync = PreviewSync::new(0);
        let batch = vec![
            applied(snippet_change(), true),
            applied(whole_file_change(), true),
        ];
        match sync.plan_fanout(&batch) {
            SyncEnvelope::ApplyPatch { changes } => assert_eq!(changes.len(), 2),
            other => panic!("expected ApplyPatch, got {other:?}"),
        }
        assert_eq!(sync.preview_version(), 0);
    }

    #[test]
    fn non_patchable_batch_falls_back_to_reload() {
        let sync = PreviewSync::new(0);
        let batch = vec![applied(whole_file_change(), true)];
        match sync.plan_fanout(&batch) {
            SyncEnvelope::Reload { version } => assert_eq!(version, 1),
            other => panic!("expected Reload, got {other:?}"),
        }
        // Counter is monotonic across fallbacks
        match sync.plan_fanout(&batch) {
            SyncEnvelope::Reload { version } => assert_eq!(version, 2),
            other => panic!("expected Reload, got {other:?}"),
        }
    }

    #[test]
    fn apply_patch_envelope_flattens_change_fields() {
        let env = SyncEnvelope::ApplyPatch {
            changes: vec![applied(snippet_change(), true)],
        };
        let v: serde_json::Value = serde_json::to_value(&env).unwrap();
        let change = &v["changes"][0];
        assert_eq!(change["patchType"], "replace-snippet");
        assert_eq!(change["match"], "bg-sky-500");
        assert_eq!(change["sourcePatched"], true);
    }
}
