use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::config::Config;
use crate::error::EngineError;
use crate::geo;

// 缓存相关常量
const LOCATION_CACHE_PREFIX: &str = "user:loc:"; // 用户位置缓存前缀
const LOCATION_CACHE_EXPIRE: u64 = 300; // 位置缓存过期时间，单位秒

/// 用户位置记录，geohash 由经纬度派生，禁止手工改写
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserLocation {
    pub user_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub geohash: String,
    pub updated_at: DateTime<Utc>,
}

/// 附近用户查询的候选行（粗筛结果）
#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    user_id: String,
    latitude: f64,
    longitude: f64,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct NearbyUser {
    pub user_id: String,
    pub distance: f64,
    pub updated_at: DateTime<Utc>,
}

const DEFAULT_SEARCH_RADIUS: f64 = 1000.0;

/// 省略radius参数时的默认半径，压进配置允许的区间内
pub(crate) fn default_radius(config: &Config) -> f64 {
    DEFAULT_SEARCH_RADIUS
        .min(config.max_search_radius)
        .max(config.min_search_radius)
}

/// 扫描精度：按最大可查半径选格子，但绝不能比存储的geohash更细，
/// 否则前缀比较永远无法命中，查询只会返回空集
pub(crate) fn query_precision(config: &Config) -> usize {
    geo::indexing_precision(config.max_search_radius).min(config.geohash_precision)
}

pub(crate) fn validate_radius(config: &Config, radius: f64) -> Result<f64, EngineError> {
    if !radius.is_finite()
        || radius < config.min_search_radius
        || radius > config.max_search_radius
    {
        return Err(EngineError::InvalidArgument(format!(
            "查询半径必须在{}~{}米之间: {}",
            config.min_search_radius, config.max_search_radius, radius
        )));
    }
    Ok(radius)
}

/// 精筛：对候选行逐个算球面距离，只保留半径内的用户，按距离升序。
/// 前缀命中只是近似，绝不能直接作为最终结果返回。
fn refine_by_distance(
    latitude: f64,
    longitude: f64,
    candidates: Vec<CandidateRow>,
    radius: f64,
) -> Vec<NearbyUser> {
    let mut nearby: Vec<NearbyUser> = candidates
        .into_iter()
        .filter_map(|c| {
            let distance = geo::calculate_distance(latitude, longitude, c.latitude, c.longitude);
            (distance <= radius).then_some(NearbyUser {
                user_id: c.user_id,
                distance,
                updated_at: c.updated_at,
            })
        })
        .collect();

    nearby.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
    nearby
}

impl UserLocation {
    /// 覆盖写入用户位置，同一用户永远只有一条记录
    pub async fn upsert(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        config: &Config,
        user_id: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, EngineError> {
        geo::validate_coordinates(latitude, longitude)?;
        let geohash = geo::encode(latitude, longitude, config.geohash_precision)?;

        let location = sqlx::query_as::<_, UserLocation>(
            r#"
            INSERT INTO user_locations (user_id, latitude, longitude, geohash, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                geohash = EXCLUDED.geohash,
                updated_at = EXCLUDED.updated_at
            RETURNING user_id, latitude, longitude, geohash, updated_at
            "#,
        )
        .bind(user_id)
        .bind(latitude)
        .bind(longitude)
        .bind(&geohash)
        .fetch_one(pool)
        .await?;

        // 位置变化后清除该用户的位置缓存
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cache_key = format!("{}{}", LOCATION_CACHE_PREFIX, user_id);
            let _: Result<(), redis::RedisError> = conn.del(&cache_key).await;
        }

        Ok(location)
    }

    pub async fn find_by_user(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        user_id: &str,
    ) -> Result<Option<Self>, EngineError> {
        let cache_key = format!("{}{}", LOCATION_CACHE_PREFIX, user_id);

        // 尝试从缓存读取
        if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
            let cached: redis::RedisResult<String> = conn.get(&cache_key).await;
            if let Ok(json_str) = cached {
                if let Ok(location) = serde_json::from_str::<UserLocation>(&json_str) {
                    tracing::debug!("Get user location from cache: {}", cache_key);
                    return Ok(Some(location));
                }
            }
        }

        let location = sqlx::query_as::<_, UserLocation>(
            r#"
            SELECT user_id, latitude, longitude, geohash, updated_at
            FROM user_locations
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        // 缓存结果
        if let Some(ref loc) = location {
            if let Ok(mut conn) = redis.get_multiplexed_async_connection().await {
                if let Ok(json_str) = serde_json::to_string(loc) {
                    let _: Result<(), redis::RedisError> = conn
                        .set_ex(&cache_key, json_str, LOCATION_CACHE_EXPIRE)
                        .await;
                    tracing::debug!("Set user location to cache: {}", cache_key);
                }
            }
        }

        Ok(location)
    }

    /// 两段式附近查询：geohash 前缀粗筛（中心格+8邻域），再按球面距离精筛。
    /// 查不到任何人返回空列表而不是错误；结果永远不包含查询者本人。
    pub async fn find_nearby(
        pool: &PgPool,
        redis: &Arc<RedisClient>,
        config: &Config,
        user_id: &str,
        radius: f64,
    ) -> Result<Vec<NearbyUser>, EngineError> {
        let radius = validate_radius(config, radius)?;

        let center = Self::find_by_user(pool, redis, user_id)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound("尚未上报位置，无法查询附近用户".to_string())
            })?;

        // 索引精度保证9格覆盖不漏贴边用户；粗一点只是多扫几行，
        // 精筛会兜底
        let precision = query_precision(config);
        let prefixes = geo::covering_prefixes(center.latitude, center.longitude, precision)?;

        let candidates = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT user_id, latitude, longitude, updated_at
            FROM user_locations
            WHERE LEFT(geohash, $1) = ANY($2)
              AND user_id <> $3
            "#,
        )
        .bind(precision as i32)
        .bind(&prefixes)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(refine_by_distance(
            center.latitude,
            center.longitude,
            candidates,
            radius,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database_url: String::new(),
            redis_url: String::new(),
            jwt_secret: String::new(),
            rate_limit_window_secs: 60,
            rate_limit_requests: 100,
            server_host: String::new(),
            server_port: 3000,
            api_base_uri: "/api".to_string(),
            geohash_precision: 8,
            daily_swipe_allowance: 100,
            min_search_radius: 10.0,
            max_search_radius: 5000.0,
            match_notify_url: None,
        }
    }

    fn candidate(user_id: &str, latitude: f64, longitude: f64) -> CandidateRow {
        CandidateRow {
            user_id: user_id.to_string(),
            latitude,
            longitude,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn refine_keeps_user_45m_away_for_radius_100() {
        // 距中心点约45米的候选
        let result = refine_by_distance(
            31.6801,
            34.5866,
            vec![candidate("u2", 31.680505, 34.5866)],
            100.0,
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].user_id, "u2");
        assert!((result[0].distance - 45.0).abs() < 0.5);
    }

    #[test]
    fn refine_drops_user_45m_away_for_radius_40() {
        let result = refine_by_distance(
            31.6801,
            34.5866,
            vec![candidate("u2", 31.680505, 34.5866)],
            40.0,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn refine_sorts_by_ascending_distance() {
        let result = refine_by_distance(
            31.6801,
            34.5866,
            vec![
                candidate("far", 31.6830, 34.5866),
                candidate("near", 31.680505, 34.5866),
            ],
            1000.0,
        );
        let ids: Vec<&str> = result.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "far"]);
    }

    #[test]
    fn refine_never_exceeds_radius() {
        let result = refine_by_distance(
            31.6801,
            34.5866,
            vec![
                candidate("a", 31.6810, 34.5870),
                candidate("b", 31.7001, 34.5866),
                candidate("c", 31.6801, 34.5867),
            ],
            200.0,
        );
        assert!(result.iter().all(|u| u.distance <= 200.0));
    }

    #[test]
    fn radius_outside_configured_bounds_is_rejected() {
        let config = test_config();
        assert!(validate_radius(&config, 5.0).is_err());
        assert!(validate_radius(&config, 5001.0).is_err());
        assert!(validate_radius(&config, f64::NAN).is_err());
        assert!(validate_radius(&config, 100.0).is_ok());
    }

    #[test]
    fn query_precision_never_exceeds_storage_precision() {
        // 存储6位、最大半径100米：半径本身允许7位格子，
        // 但6位存储下7位前缀永远比不中，必须压回6位
        let mut config = test_config();
        config.geohash_precision = 6;
        config.max_search_radius = 100.0;
        assert_eq!(query_precision(&config), 6);

        // 存储精度足够时按半径取格子
        config.geohash_precision = 8;
        assert_eq!(query_precision(&config), 7);

        config.max_search_radius = 5000.0;
        assert_eq!(query_precision(&config), 4);
    }

    #[test]
    fn default_radius_respects_configured_bounds() {
        let mut config = test_config();
        assert_eq!(default_radius(&config), 1000.0);
        assert!(validate_radius(&config, default_radius(&config)).is_ok());

        // 最大半径小于默认值时，默认半径收缩到上限
        config.max_search_radius = 500.0;
        assert_eq!(default_radius(&config), 500.0);
        assert!(validate_radius(&config, default_radius(&config)).is_ok());

        // 最小半径高于默认值时，默认半径抬升到下限
        config.min_search_radius = 2000.0;
        config.max_search_radius = 5000.0;
        assert_eq!(default_radius(&config), 2000.0);
        assert!(validate_radius(&config, default_radius(&config)).is_ok());
    }
}
