use axum::{
    extract::{Path, Query, State},
    Json,
};
use nudge_core::job::{JobReport, JobStart, SCAN};
use serde::Deserialize;
use serde_json::{json, Value};

use super::validate_owner;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StartParams {
    /// Cancel a running sweep instead of returning 409.
    #[serde(default)]
    pub supersede: bool,
}

fn validate_class(class: &str) -> Result<(), AppError> {
    if class != SCAN {
        return Err(AppError::not_found(format!("unknown job class '{class}'")));
    }
    Ok(())
}

/// POST /api/jobs/{class}/{owner}
///
/// Runs the sweep to completion, cancellation or deadline and returns its
/// report. 409 if a sweep is already running and `supersede` is not set.
pub async fn start_job(
    State(app): State<AppState>,
    Path((class, owner)): Path<(String, String)>,
    Query(params): Query<StartParams>,
) -> Result<Json<JobReport>, AppError> {
    validate_class(&class)?;
    validate_owner(&owner)?;

    let items = app.repos.list(&owner).await?;
    let spec = app.job_spec(&class, &owner);
    let start = if params.supersede {
        app.jobs.start_superseding(&spec, items, &*app.worker).await?
    } else {
        app.jobs.start(&spec, items, &*app.worker).await?
    };
    match start {
        JobStart::Finished(report) => Ok(Json(report)),
        JobStart::Busy => Err(AppError::conflict(format!(
            "{class} already running for '{owner}'"
        ))),
    }
}

/// POST /api/jobs/{class}/{owner}/cancel
pub async fn cancel_job(
    State(app): State<AppState>,
    Path((class, owner)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    validate_class(&class)?;
    validate_owner(&owner)?;
    let cancelled = app.jobs.cancel(&class, &owner).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}

/// GET /api/jobs/{class}/{owner}
pub async fn job_status(
    State(app): State<AppState>,
    Path((class, owner)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    validate_class(&class)?;
    validate_owner(&owner)?;
    let active = app.jobs.active(&class, &owner).await?;
    let last_report = app.jobs.last_report(&class, &owner).await?;
    Ok(Json(json!({
        "active": active,
        "last_report": last_report,
    })))
}
