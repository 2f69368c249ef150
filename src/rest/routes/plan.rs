// rest/routes/plan.rs — Plan generation route.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::plan::{self, has_user_content, PlanRequest};
use crate::rest::error_reply;
use crate::AppContext;

/// POST /api/v1/plan
///
/// Takes the conversation plus an optional DOM selection hint, asks the
/// model for a patch plan, and returns the raw response text. The client
/// validates and applies in a separate step so a bad plan never touches
/// the project.
pub async fn generate_plan(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<PlanRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if !has_user_content(&body.messages) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "at least one non-empty user message is required" })),
        ));
    }

    // A missing project id falls back to the template slug as the id, so
    // first contact with a live page seeds it implicitly.
    let project_id = body
        .project_id
        .clone()
        .or_else(|| body.template_slug.clone())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "projectId or templateSlug is required" })),
            )
        })?;

    ctx.projects
        .open(&project_id, body.template_slug.as_deref())
        .await
        .map_err(error_reply)?;
    let snapshot = ctx
        .projects
        .snapshot(&project_id)
        .await
        .map_err(error_reply)?;

    let raw = plan::request_plan(
        ctx.model.as_ref(),
        &ctx.config.model,
        &ctx.config.context,
        &snapshot.file_path,
        &snapshot.content,
        body.selection_hint.as_ref(),
        &body.messages,
    )
    .await
    .map_err(error_reply)?;

    Ok(Json(json!({
        "projectId": project_id,
        "raw": raw,
    })))
}
