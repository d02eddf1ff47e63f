use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use starport_core::TransactionId;

use crate::app::dto::{self, InitiateTradeRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(initiate_trade))
        .route("/:id", get(get_trade))
}

/// POST /trades
///
/// Accepted, not settled: settlement happens asynchronously and is reported on
/// `/stream` (`cargo.created` or `settlement.failed`).
pub async fn initiate_trade(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<InitiateTradeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let trade = services.initiate_trade(&body)?;
    Ok((StatusCode::ACCEPTED, Json(trade)))
}

/// GET /trades/:id
pub async fn get_trade(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: TransactionId = dto::parse_id(&id)?;
    Ok(Json(services.trade(&id)?))
}
