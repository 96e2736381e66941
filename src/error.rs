use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::utils::{error_codes, error_to_api_response};

/// 引擎错误分类
///
/// InvalidArgument / SelfReference 在任何写入发生前被拒绝；
/// QuotaExceeded 是预期内的用户态结果，只等额度翻转或升级会员；
/// StorageUnavailable 是瞬态错误，由调用方自行退避重试，
/// 引擎内部不重试，避免额度被重复扣减。
#[derive(Debug)]
pub enum EngineError {
    InvalidArgument(String),
    SelfReference,
    NotFound(String),
    QuotaExceeded,
    StorageUnavailable,
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => EngineError::NotFound("记录不存在".to_string()),
            e => {
                tracing::error!("Storage error: {}", e);
                EngineError::StorageUnavailable
            }
        }
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(e: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", e);
        EngineError::StorageUnavailable
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match self {
            EngineError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, msg)
            }
            EngineError::SelfReference => (
                StatusCode::BAD_REQUEST,
                error_codes::SELF_REFERENCE,
                "不能对自己滑动".to_string(),
            ),
            EngineError::NotFound(msg) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg),
            EngineError::QuotaExceeded => {
                // 额度用尽属于正常业务结果，不作为错误记录
                tracing::debug!("Swipe quota exhausted");
                (
                    StatusCode::FORBIDDEN,
                    error_codes::QUOTA_EXCEEDED,
                    "今日滑动次数已用完".to_string(),
                )
            }
            EngineError::StorageUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                error_codes::STORAGE_UNAVAILABLE,
                "存储服务暂不可用，请稍后重试".to_string(),
            ),
        };

        (status, error_to_api_response::<()>(code, msg)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_maps_to_forbidden() {
        let resp = EngineError::QuotaExceeded.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn invalid_argument_maps_to_bad_request() {
        let resp = EngineError::InvalidArgument("坐标超出范围".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn row_not_found_is_not_a_storage_failure() {
        let err = EngineError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
