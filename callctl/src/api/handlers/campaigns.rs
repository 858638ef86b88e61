//! HTTP handler for starting a campaign's batch dispatch.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::dispatch::DispatchReport;
use crate::errors::Error;
use crate::AppState;

// POST /campaigns/{id}/dispatch - issue calls for all pending contacts
pub async fn dispatch_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchReport>, Error> {
    let report = state.dispatcher.run_campaign(id).await?;
    Ok(Json(report))
}
