//! HTTP handlers for call inspection and manual remediation.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::api::models::calls::{CallDetail, CallSyncResult};
use crate::errors::Error;
use crate::reconcile::SweepReport;
use crate::AppState;

// GET /calls/{id} - operator view of one call
pub async fn get_call(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CallDetail>, Error> {
    let call = state.store.get_call(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Call".to_string(),
        id: id.to_string(),
    })?;

    let transcript = state.store.get_transcript(id).await?;
    let analytics = state.store.get_analytics(id).await?;

    Ok(Json(CallDetail {
        call,
        transcript,
        analytics,
    }))
}

// POST /calls/sync - run one reconciliation sweep now
pub async fn sync_all(State(state): State<AppState>) -> Result<Json<SweepReport>, Error> {
    let report = state.reconciler_handle.trigger_sweep().await?;
    Ok(Json(report))
}

// POST /calls/{id}/sync - force-sync one call against provider state
pub async fn sync_one(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<CallSyncResult>, Error> {
    let call = state.store.get_call(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Call".to_string(),
        id: id.to_string(),
    })?;

    if call.status.is_terminal() {
        return Ok(Json(CallSyncResult {
            synced: false,
            status: call.status.as_str().to_string(),
        }));
    }

    let synced = state.reconciler.sync_call(&call).await?;
    let refreshed = state.store.get_call(id).await?.map(|c| c.status).unwrap_or(call.status);

    Ok(Json(CallSyncResult {
        synced,
        status: refreshed.as_str().to_string(),
    }))
}
