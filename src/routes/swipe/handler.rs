use axum::{
    Extension,
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::EngineError;
use crate::utils::{Claims, success_to_api_response};

use super::model::{Direction, QuotaState, SwipeRecord, ordered_pair};

#[derive(Debug, Deserialize)]
pub struct SwipeRequest {
    pub target_id: String,
    pub direction: Direction,
}

#[derive(Debug, Serialize)]
pub struct SwipeResponse {
    pub matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub remaining: i32,
    pub is_premium: bool,
}

#[axum::debug_handler]
pub async fn create_swipe(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SwipeRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let outcome = SwipeRecord::record(
        &state.pool,
        &state.config,
        &claims.sub,
        &req.target_id,
        req.direction,
    )
    .await?;

    // 只有本次新建的配对才通知，重复滑动不会再触发
    if outcome.newly_matched {
        if let Some(match_id) = &outcome.match_id {
            let (user_a, user_b) = ordered_pair(&claims.sub, &req.target_id);
            tracing::info!("Match created: {} ({} / {})", match_id, user_a, user_b);
            state.notifier.dispatch(match_id, user_a, user_b);
        }
    }

    Ok((
        StatusCode::OK,
        success_to_api_response(SwipeResponse {
            matched: outcome.matched,
            match_id: outcome.match_id,
        }),
    ))
}

#[axum::debug_handler]
pub async fn get_quota(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, EngineError> {
    let quota = QuotaState::fetch(&state.pool, &state.config, &claims.sub).await?;

    Ok((
        StatusCode::OK,
        success_to_api_response(QuotaResponse {
            remaining: quota.remaining,
            is_premium: quota.is_premium,
        }),
    ))
}
