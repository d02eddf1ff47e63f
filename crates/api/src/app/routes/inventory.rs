use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
};

use starport_core::StationId;

use crate::app::dto::{self, ProvisionInventoryRequest};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/:station_id", get(get_inventory).put(provision_inventory))
}

/// GET /inventory/:station_id
pub async fn get_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Path(station_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: StationId = dto::parse_id(&station_id)?;
    Ok(Json(services.inventory(&id)?))
}

/// PUT /inventory/:station_id
///
/// Replaces the station's holdings; repeated items count once.
pub async fn provision_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Path(station_id): Path<String>,
    Json(body): Json<ProvisionInventoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id: StationId = dto::parse_id(&station_id)?;
    let items = dto::parse_items(&body.items)?;
    Ok(Json(services.provision_inventory(id, items)?))
}
