use std::time::Duration;

use axum::{extract::State, Json};
use nudge_core::error::NudgeError;
use nudge_core::lock::{lock_name, LockOutcome};
use nudge_core::session::Session;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AppError;
use crate::flows::{CarouselSession, ImageApprovalSession};
use crate::state::AppState;

/// Bounds one read-modify-write cycle on a session.
const SESSION_LOCK_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub session_id: String,
    pub action: CallbackAction,
    /// Version the card was rendered at.
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackAction {
    Next,
    Prev,
    Skip,
    Done,
    Approve,
    Reject,
}

/// POST /api/callbacks
///
/// A button press on a card. The whole cycle runs under a lock keyed to the
/// session id; a concurrent press on the same card gets 409.
pub async fn handle_callback(
    State(app): State<AppState>,
    Json(req): Json<CallbackRequest>,
) -> Result<Json<Value>, AppError> {
    let lock = lock_name("session", &req.session_id);
    match app
        .locks
        .with_lock(&lock, SESSION_LOCK_TTL, apply(&app, &req))
        .await
    {
        LockOutcome::Ran(result) => result.map(Json),
        LockOutcome::Busy => Err(AppError::conflict(
            "another action on this card is in progress",
        )),
    }
}

async fn apply(app: &AppState, req: &CallbackRequest) -> Result<Value, AppError> {
    debug!(session_id = %req.session_id, action = ?req.action, "callback");
    match req.action {
        CallbackAction::Next | CallbackAction::Prev | CallbackAction::Skip | CallbackAction::Done => {
            carousel(app, req).await
        }
        CallbackAction::Approve | CallbackAction::Reject => image_approval(app, req).await,
    }
}

/// Reject a press rendered against an older version of the session.
fn check_version<T>(session: &Session<T>, expected: u64) -> Result<(), NudgeError> {
    if expected != session.version {
        return Err(NudgeError::StaleSession {
            id: session.id.clone(),
            expected,
            actual: session.version,
        });
    }
    Ok(())
}

async fn carousel(app: &AppState, req: &CallbackRequest) -> Result<Value, AppError> {
    let id = req.session_id.as_str();
    let ttl = app.session_ttl();
    let session = app.sessions.resolve::<CarouselSession>(id).await?;
    check_version(&session, req.version)?;
    let owner = session.data.owner.clone();

    match req.action {
        CallbackAction::Next | CallbackAction::Prev => {
            let forward = req.action == CallbackAction::Next;
            let updated = app
                .sessions
                .update::<CarouselSession, _>(id, req.version, ttl, move |c| {
                    if forward {
                        c.next()
                    } else {
                        c.prev()
                    }
                })
                .await?;
            let card = updated.data.card(id, updated.version);
            app.deliver_card(&owner, &card).await;
            Ok(json!({
                "status": "ok",
                "session_id": id,
                "version": updated.version,
                "card": card,
            }))
        }
        CallbackAction::Skip => match session.data.without_current() {
            Some(next) => {
                let new_id = app.sessions.replace(id, next.clone(), ttl).await?;
                let card = next.card(&new_id, 1);
                app.deliver_card(&owner, &card).await;
                Ok(json!({
                    "status": "ok",
                    "session_id": new_id,
                    "version": 1,
                    "card": card,
                }))
            }
            None => {
                app.sessions.delete(id).await?;
                app.notify(&owner, "That was the last one. Nice work.").await;
                Ok(json!({ "status": "done" }))
            }
        },
        _ => {
            app.sessions.delete(id).await?;
            Ok(json!({ "status": "done" }))
        }
    }
}

async fn image_approval(app: &AppState, req: &CallbackRequest) -> Result<Value, AppError> {
    let id = req.session_id.as_str();
    let session = app.sessions.resolve::<ImageApprovalSession>(id).await?;
    check_version(&session, req.version)?;
    app.sessions.delete(id).await?;

    let pending = session.data;
    if req.action == CallbackAction::Approve {
        app.notify(&pending.owner, &format!("Posted: {}", pending.caption))
            .await;
        Ok(json!({ "status": "approved", "image_url": pending.image_url }))
    } else {
        Ok(json!({ "status": "rejected" }))
    }
}
