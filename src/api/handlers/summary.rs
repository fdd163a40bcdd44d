use axum::Json;
use axum::extract::{Query, State};
use tracing::{error, info};

use crate::aggregate::{Selection, SummaryDocument};
use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::api::types::SummaryQuery;

pub async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryDocument>, ApiError> {
    let correlation = uuid::Uuid::new_v4();
    let selection = Selection::parse(query.account_id.as_deref().unwrap_or("default"));
    info!(%correlation, ?selection, "summary requested");

    let doc = state.aggregator.summary(&selection).await.map_err(|e| {
        error!(%correlation, error = %format!("{e:#}"), "summary composition failed");
        ApiError::Internal(format!("{e:#}"))
    })?;

    Ok(Json(doc))
}
