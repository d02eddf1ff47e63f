use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
};

use starport_cargo::CargoStatus;
use starport_core::ShipmentId;

use crate::app::dto::{self, UpdateCargoRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/:shipment_id", get(get_cargo).patch(update_cargo))
}

/// GET /cargo/:shipment_id
pub async fn get_cargo(
    Extension(services): Extension<Arc<AppServices>>,
    Path(shipment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: ShipmentId = dto::parse_id(&shipment_id)?;
    Ok(Json(services.cargo(&id)?))
}

/// PATCH /cargo/:shipment_id
///
/// Status only moves forward: pending → in-transit → delivered.
pub async fn update_cargo(
    Extension(services): Extension<Arc<AppServices>>,
    Path(shipment_id): Path<String>,
    Json(body): Json<UpdateCargoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id: ShipmentId = dto::parse_id(&shipment_id)?;
    let next: CargoStatus = body.status.parse()?;
    Ok(Json(services.advance_cargo(&id, next)?))
}
