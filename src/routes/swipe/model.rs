use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::config::Config;
use crate::error::EngineError;

/// 滑动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Like,
    Pass,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Like => "like",
            Direction::Pass => "pass",
        }
    }
}

/// 配对身份按用户ID字典序排定，(A,B)和(B,A)落到同一行
pub fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct Match {
    pub match_id: String,
    pub user_a: String,
    pub user_b: String,
    pub created_at: DateTime<Utc>,
}

/// 单次滑动的结果
#[derive(Debug)]
pub struct SwipeOutcome {
    pub matched: bool,
    pub match_id: Option<String>,
    /// 本次调用是否新建了配对（决定要不要发通知）
    pub newly_matched: bool,
}

/// 每用户每日滑动额度。
/// 翻转是惰性的：每次访问前先按服务器UTC日期补一次重置，
/// 不依赖任何后台定时任务。
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct QuotaState {
    pub user_id: String,
    pub remaining: i32,
    pub window_start: NaiveDate,
    pub is_premium: bool,
}

impl QuotaState {
    pub fn has_allowance(&self) -> bool {
        self.is_premium || self.remaining > 0
    }

    /// 首次触达时补建额度行，会员标记由订阅服务另行写入
    async fn ensure_row(
        conn: &mut PgConnection,
        user_id: &str,
        allowance: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO swipe_quotas (user_id, remaining, window_start, is_premium)
            VALUES ($1, $2, (NOW() AT TIME ZONE 'UTC')::date, FALSE)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(allowance)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// 跨天重置，日期一律取服务器UTC，绝不采信客户端时间
    async fn rollover(
        conn: &mut PgConnection,
        user_id: &str,
        allowance: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE swipe_quotas
            SET remaining = $2, window_start = (NOW() AT TIME ZONE 'UTC')::date
            WHERE user_id = $1 AND window_start < (NOW() AT TIME ZONE 'UTC')::date
            "#,
        )
        .bind(user_id)
        .bind(allowance)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// 只读取（查询额度、附近查询的额度门槛用），不扣减
    pub async fn fetch(
        pool: &PgPool,
        config: &Config,
        user_id: &str,
    ) -> Result<Self, EngineError> {
        let mut conn = pool.acquire().await?;
        Self::ensure_row(&mut conn, user_id, config.daily_swipe_allowance).await?;
        Self::rollover(&mut conn, user_id, config.daily_swipe_allowance).await?;

        let quota = sqlx::query_as::<_, QuotaState>(
            r#"
            SELECT user_id, remaining, window_start, is_premium
            FROM swipe_quotas
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(quota)
    }

    /// 检查并扣减一次额度。
    /// 条件更新单条语句完成读改写，行锁保证同一用户并发滑动
    /// 不会都读到过期的 remaining 而超扣；会员命中条件但不扣减。
    /// 没有命中任何行即额度用尽。
    pub(crate) async fn consume(
        conn: &mut PgConnection,
        config: &Config,
        user_id: &str,
    ) -> Result<Self, EngineError> {
        Self::ensure_row(&mut *conn, user_id, config.daily_swipe_allowance).await?;
        Self::rollover(&mut *conn, user_id, config.daily_swipe_allowance).await?;

        let quota = sqlx::query_as::<_, QuotaState>(
            r#"
            UPDATE swipe_quotas
            SET remaining = CASE WHEN is_premium THEN remaining ELSE remaining - 1 END
            WHERE user_id = $1 AND (is_premium OR remaining > 0)
            RETURNING user_id, remaining, window_start, is_premium
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

        quota.ok_or(EngineError::QuotaExceeded)
    }
}

impl Match {
    async fn find_by_pair(
        conn: &mut PgConnection,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Match>(
            r#"
            SELECT match_id, user_a, user_b, created_at
            FROM matches
            WHERE user_a = $1 AND user_b = $2
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&mut *conn)
        .await
    }

    /// 条件写入：唯一约束键是排序后的用户对，
    /// 两个方向的请求同时竞争时只有一个能建成，输家读到已有行。
    /// 返回None表示配对已存在。
    async fn try_create(
        conn: &mut PgConnection,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let match_id = Uuid::new_v4().to_string();
        sqlx::query_as::<_, Match>(
            r#"
            INSERT INTO matches (match_id, user_a, user_b, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_a, user_b) DO NOTHING
            RETURNING match_id, user_a, user_b, created_at
            "#,
        )
        .bind(&match_id)
        .bind(user_a)
        .bind(user_b)
        .fetch_optional(&mut *conn)
        .await
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct SwipeRecord {
    pub actor_id: String,
    pub target_id: String,
    pub direction: String,
    pub created_at: DateTime<Utc>,
}

impl SwipeRecord {
    /// 记录一次滑动并同步检测配对。
    ///
    /// 额度扣减、滑动写入、配对创建在同一个事务里提交，
    /// 请求中途被放弃时三者一起回滚，不会留下扣了额度没有记录
    /// （或反过来）的半截状态。
    pub async fn record(
        pool: &PgPool,
        config: &Config,
        actor_id: &str,
        target_id: &str,
        direction: Direction,
    ) -> Result<SwipeOutcome, EngineError> {
        if actor_id == target_id {
            return Err(EngineError::SelfReference);
        }
        if target_id.is_empty() {
            return Err(EngineError::InvalidArgument("目标用户ID不能为空".to_string()));
        }

        let (user_a, user_b) = ordered_pair(actor_id, target_id);
        let mut tx = pool.begin().await?;

        // 对排序后的用户对加事务级咨询锁。READ COMMITTED 下两个方向
        // 的滑动并发时，双方都可能在对向提交前读互惠记录，谁都看不到
        // 对方的like，配对就被双双漏建；锁住用户对让后到者等先到者
        // 提交后再读
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1), hashtext($2))")
            .bind(user_a)
            .bind(user_b)
            .execute(&mut *tx)
            .await?;

        // 配对一旦成立，这对用户的滑动记录即被冻结：
        // 重复滑动不改写记录、不扣额度，只回报既有配对
        if let Some(existing) = Match::find_by_pair(&mut tx, user_a, user_b).await? {
            tx.rollback().await?;
            return Ok(SwipeOutcome {
                matched: true,
                match_id: Some(existing.match_id),
                newly_matched: false,
            });
        }

        QuotaState::consume(&mut tx, config, actor_id).await?;

        // 同一有序对只保留最近一次决定
        sqlx::query(
            r#"
            INSERT INTO swipes (actor_id, target_id, direction, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (actor_id, target_id)
            DO UPDATE SET direction = EXCLUDED.direction, created_at = EXCLUDED.created_at
            "#,
        )
        .bind(actor_id)
        .bind(target_id)
        .bind(direction.as_str())
        .execute(&mut *tx)
        .await?;

        let mut outcome = SwipeOutcome {
            matched: false,
            match_id: None,
            newly_matched: false,
        };

        if direction == Direction::Like {
            // 互惠检测：读反向滑动
            let reciprocal: Option<String> = sqlx::query_scalar(
                r#"
                SELECT direction FROM swipes
                WHERE actor_id = $1 AND target_id = $2
                "#,
            )
            .bind(target_id)
            .bind(actor_id)
            .fetch_optional(&mut *tx)
            .await?;

            if reciprocal.as_deref() == Some("like") {
                match Match::try_create(&mut tx, user_a, user_b).await? {
                    Some(created) => {
                        outcome = SwipeOutcome {
                            matched: true,
                            match_id: Some(created.match_id),
                            newly_matched: true,
                        };
                    }
                    None => {
                        // 对向请求抢先建好了配对，静默采用已有结果
                        let existing = Match::find_by_pair(&mut tx, user_a, user_b)
                            .await?
                            .ok_or(EngineError::StorageUnavailable)?;
                        outcome = SwipeOutcome {
                            matched: true,
                            match_id: Some(existing.match_id),
                            newly_matched: false,
                        };
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_pair_is_direction_independent() {
        assert_eq!(ordered_pair("alice", "bob"), ("alice", "bob"));
        assert_eq!(ordered_pair("bob", "alice"), ("alice", "bob"));
        assert_eq!(ordered_pair("x", "x"), ("x", "x"));
    }

    #[test]
    fn direction_serde_uses_lowercase() {
        assert_eq!(
            serde_json::from_str::<Direction>("\"like\"").unwrap(),
            Direction::Like
        );
        assert_eq!(
            serde_json::from_str::<Direction>("\"pass\"").unwrap(),
            Direction::Pass
        );
        assert!(serde_json::from_str::<Direction>("\"superlike\"").is_err());
        assert_eq!(serde_json::to_string(&Direction::Like).unwrap(), "\"like\"");
    }

    #[test]
    fn direction_as_str_matches_storage_values() {
        assert_eq!(Direction::Like.as_str(), "like");
        assert_eq!(Direction::Pass.as_str(), "pass");
    }

    #[test]
    fn premium_user_has_allowance_at_zero_remaining() {
        let quota = QuotaState {
            user_id: "u1".to_string(),
            remaining: 0,
            window_start: NaiveDate::from_ymd_opt(2026, 8, 25).unwrap(),
            is_premium: true,
        };
        assert!(quota.has_allowance());
    }

    #[test]
    fn exhausted_non_premium_user_has_no_allowance() {
        let quota = QuotaState {
            user_id: "u1".to_string(),
            remaining: 0,
            window_start: NaiveDate::from_ymd_opt(2026, 8, 25).unwrap(),
            is_premium: false,
        };
        assert!(!quota.has_allowance());
    }
}
