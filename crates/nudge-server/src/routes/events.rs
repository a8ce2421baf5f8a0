use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::{DateTime, Utc};
use nudge_core::idempotency::EventId;
use nudge_core::job::{ItemOutcome, JobReport, JobStart, SweepItem, SCAN};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{validate_owner, validate_repo};
use crate::error::AppError;
use crate::flows::{CarouselSession, ImageApprovalSession};
use crate::signature::{verify_signature, SIGNATURE_HEADER};
use crate::state::AppState;

/// One inbound delivery. Upstream may deliver the same `event_id` more than once.
#[derive(Debug, Deserialize)]
pub struct InboundEvent {
    pub event_id: EventId,
    pub payload: EventPayload,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// `/scan`: sweep all of the user's repositories, replacing a running sweep.
    Scan { user: String },
    /// `/cancel`: stop the user's running sweep.
    Cancel { user: String },
    /// `/cards`: page through repositories one card at a time.
    Cards { user: String },
    /// A generated image the user must approve before it is posted.
    Announce {
        user: String,
        image_url: String,
        caption: String,
    },
    /// A repository changed upstream.
    Push {
        owner: String,
        repo: String,
        last_modified: DateTime<Utc>,
    },
}

impl EventPayload {
    /// Reject names that would not form a well-shaped store key.
    fn validate(&self) -> Result<(), AppError> {
        match self {
            Self::Scan { user }
            | Self::Cancel { user }
            | Self::Cards { user }
            | Self::Announce { user, .. } => validate_owner(user),
            Self::Push { owner, repo, .. } => {
                validate_owner(owner)?;
                validate_repo(repo)
            }
        }
    }
}

/// POST /api/events
///
/// Signature check, then parse and validate, then the idempotency claim.
/// Only the first delivery of an event id reaches a handler. A claim whose
/// handler fails is released so upstream redelivery is processed.
pub async fn receive_event(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if let Some(secret) = &app.webhook_secret {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("missing signature"))?;
        if !verify_signature(&body, header, secret.as_bytes()) {
            return Err(AppError::unauthorized("invalid signature"));
        }
    }

    let event: InboundEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("invalid event: {e}")))?;
    event.payload.validate()?;

    if !app.guard.should_process(&event.event_id).await {
        info!(event_id = %event.event_id, "duplicate event ignored");
        return Ok(Json(json!({ "status": "duplicate", "event_id": event.event_id })));
    }

    let mut result = match dispatch(&app, event.payload).await {
        Ok(result) => result,
        Err(e) => {
            app.guard.release(&event.event_id).await;
            return Err(e);
        }
    };
    result["status"] = json!("processed");
    result["event_id"] = json!(event.event_id);
    Ok(Json(result))
}

async fn dispatch(app: &AppState, payload: EventPayload) -> Result<Value, AppError> {
    match payload {
        EventPayload::Scan { user } => scan(app, user).await,
        EventPayload::Cancel { user } => cancel(app, &user).await,
        EventPayload::Cards { user } => cards(app, &user).await,
        EventPayload::Announce {
            user,
            image_url,
            caption,
        } => announce(app, user, image_url, caption).await,
        EventPayload::Push {
            owner,
            repo,
            last_modified,
        } => push(app, &owner, repo, last_modified).await,
    }
}

async fn scan(app: &AppState, user: String) -> Result<Value, AppError> {
    let items = app.repos.list(&user).await?;
    let spec = app.job_spec(SCAN, &user);
    let total = items.len();
    let task_app = app.clone();
    tokio::spawn(async move {
        let app = task_app;
        match app.jobs.start_superseding(&spec, items, &*app.worker).await {
            Ok(JobStart::Finished(report)) => app.notify(&user, &summary(&report)).await,
            Ok(JobStart::Busy) => {
                app.notify(&user, "A previous scan is still finishing. Try again in a minute.")
                    .await
            }
            Err(e) => warn!(owner = %user, error = %e, "scan failed to start"),
        }
    });
    Ok(json!({ "action": "scan_started", "total": total }))
}

async fn cancel(app: &AppState, user: &str) -> Result<Value, AppError> {
    let cancelled = app.jobs.cancel(SCAN, user).await?;
    let (action, text) = if cancelled {
        ("cancelled", "Stopping your scan after the current batch.")
    } else {
        ("nothing_running", "No scan is running.")
    };
    app.notify(user, text).await;
    Ok(json!({ "action": action }))
}

async fn cards(app: &AppState, user: &str) -> Result<Value, AppError> {
    let repos: Vec<String> = app
        .repos
        .list(user)
        .await?
        .into_iter()
        .map(|item| item.name)
        .collect();
    if repos.is_empty() {
        app.notify(user, "No repositories to show.").await;
        return Ok(json!({ "action": "no_repos" }));
    }
    let carousel = CarouselSession::new(user, repos);
    let id = app.sessions.create(carousel.clone(), app.session_ttl()).await?;
    let card = carousel.card(&id, 1);
    app.deliver_card(user, &card).await;
    Ok(json!({ "action": "cards", "session_id": id, "card": card }))
}

async fn announce(
    app: &AppState,
    user: String,
    image_url: String,
    caption: String,
) -> Result<Value, AppError> {
    let pending = ImageApprovalSession {
        owner: user,
        image_url,
        caption,
    };
    let id = app.sessions.create(pending.clone(), app.session_ttl()).await?;
    let card = pending.card(&id, 1);
    app.deliver_card(&pending.owner, &card).await;
    Ok(json!({ "action": "approval_requested", "session_id": id, "card": card }))
}

async fn push(
    app: &AppState,
    owner: &str,
    repo: String,
    last_modified: DateTime<Utc>,
) -> Result<Value, AppError> {
    let item = SweepItem {
        name: repo,
        last_modified,
    };
    let outcome = app
        .jobs
        .process_item(
            owner,
            &item,
            app.config.coordination.analyze_lock_ttl(),
            &*app.worker,
        )
        .await;
    let value = match outcome {
        ItemOutcome::Analyzed => json!({ "action": "push", "outcome": "analyzed" }),
        ItemOutcome::Cached => json!({ "action": "push", "outcome": "cached" }),
        ItemOutcome::Busy => {
            return Err(AppError::conflict(format!(
                "{owner}/{} is being analyzed; redeliver later",
                item.name
            )))
        }
        ItemOutcome::Failed(message) => {
            json!({ "action": "push", "outcome": "failed", "error": message })
        }
    };
    Ok(value)
}

fn summary(report: &JobReport) -> String {
    let mut text = format!(
        "Scan {}: {} analyzed, {} unchanged, {} in progress elsewhere",
        report.status,
        report.analyzed,
        report.cached,
        report.busy
    );
    if !report.errors.is_empty() {
        text.push_str(&format!(", {} failed", report.errors.len()));
    }
    if report.hit_timeout {
        text.push_str(&format!(
            ". Stopped after {} of {}; run /scan again to continue",
            report.processed, report.total
        ));
    }
    text.push('.');
    text
}
