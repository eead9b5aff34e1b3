use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use soderia_core::report::{summarize, BillingSummary, DateRange};

use crate::auth::StaffUser;
use crate::error::ApiError;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct BillingQuery {
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
}

/// Per-client totals of the purchases made between two calendar days.
pub async fn purchases_by_dates(
    State(state): State<AppState>,
    _staff: StaffUser,
    Query(query): Query<BillingQuery>,
) -> Result<Json<Vec<BillingSummary>>, ApiError> {
    let range = DateRange::parse(query.from.as_deref(), query.to.as_deref())?;
    let purchases = state
        .storage()
        .purchases()
        .list_billed_between(range.start(), range.end())
        .await?;
    if purchases.is_empty() {
        return Err(ApiError::not_found("no purchases in the requested range"));
    }
    Ok(Json(summarize(purchases)))
}
