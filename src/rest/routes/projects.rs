// rest/routes/projects.rs — Project state and history routes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::patch::{parse_patch_plan, validate_plan_value, ValidatedPlan};
use crate::rest::error_reply;
use crate::sync::SyncEnvelope;
use crate::AppContext;

pub async fn get_project(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let snapshot = ctx.projects.snapshot(&id).await.map_err(error_reply)?;
    Ok(Json(serde_json::to_value(snapshot).unwrap_or_default()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    /// Raw model response text, validated server-side before anything runs.
    #[serde(default)]
    pub raw_plan: Option<String>,
    /// Already-parsed plan object, for clients that validated locally.
    #[serde(default)]
    pub plan: Option<Value>,
    #[serde(default)]
    pub template_slug: Option<String>,
}

/// POST /api/v1/projects/{id}/apply
pub async fn apply_plan(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(body): Json<ApplyRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let validated: ValidatedPlan = match (&body.raw_plan, &body.plan) {
        (Some(raw), _) => parse_patch_plan(raw).map_err(error_reply)?,
        (None, Some(value)) => validate_plan_value(value).map_err(error_reply)?,
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "rawPlan or plan is required" })),
            ));
        }
    };

    ctx.projects
        .open(&id, body.template_slug.as_deref())
        .await
        .map_err(error_reply)?;
    let outcome = ctx.projects.apply(&id, &validated).await.map_err(error_reply)?;

    ctx.sync.notify(
        "patch.applied",
        json!({ "projectId": id, "version": outcome.version, "changes": outcome.applied_changes.len() }),
    );
    ctx.sync.announce_apply(outcome.applied_changes.clone());

    let mut reply = serde_json::to_value(&outcome).unwrap_or_default();
    if let Some(obj) = reply.as_object_mut() {
        obj.insert("warnings".into(), json!(validated.warnings));
    }
    Ok(Json(reply))
}

/// POST /api/v1/projects/{id}/undo
pub async fn undo_version(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    step(ctx, id, true).await
}

/// POST /api/v1/projects/{id}/redo
pub async fn redo_version(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    step(ctx, id, false).await
}

async fn step(
    ctx: Arc<AppContext>,
    id: String,
    backward: bool,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let outcome = if backward {
        ctx.projects.undo(&id).await
    } else {
        ctx.projects.redo(&id).await
    }
    .map_err(error_reply)?;

    // A step at the history boundary changes nothing; no frames for those.
    if outcome.moved {
        let method = if backward { "patch.undone" } else { "patch.redone" };
        ctx.sync
            .notify(method, json!({ "projectId": id, "version": outcome.version }));
        // History jumps rewrite the whole file, so the preview reloads.
        ctx.sync.send(&SyncEnvelope::Reload {
            version: ctx.sync.bump_preview_version(),
        });
    }

    Ok(Json(serde_json::to_value(&outcome).unwrap_or_default()))
}
