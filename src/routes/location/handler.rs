use axum::{
    Extension,
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::EngineError;
use crate::routes::swipe::model::QuotaState;
use crate::utils::{Claims, success_to_api_response};

use super::model::{UserLocation, default_radius};

#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize)]
pub struct UpdateLocationResponse {
    pub geohash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub radius: Option<f64>,
}

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateLocationRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let location = UserLocation::upsert(
        &state.pool,
        &state.redis,
        &state.config,
        &claims.sub,
        req.latitude,
        req.longitude,
    )
    .await?;

    Ok((
        StatusCode::OK,
        success_to_api_response(UpdateLocationResponse {
            geohash: location.geohash,
            updated_at: location.updated_at,
        }),
    ))
}

#[axum::debug_handler]
pub async fn find_nearby(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<NearbyQuery>,
) -> Result<impl IntoResponse, EngineError> {
    // 没有剩余额度的普通用户不开放发现流，会员不受限
    let quota = QuotaState::fetch(&state.pool, &state.config, &claims.sub).await?;
    if !quota.has_allowance() {
        return Err(EngineError::QuotaExceeded);
    }

    let radius = query
        .radius
        .unwrap_or_else(|| default_radius(&state.config));
    let users = UserLocation::find_nearby(
        &state.pool,
        &state.redis,
        &state.config,
        &claims.sub,
        radius,
    )
    .await?;

    Ok((StatusCode::OK, success_to_api_response(users)))
}
