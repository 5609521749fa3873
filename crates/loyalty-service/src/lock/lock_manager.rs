//! 分布式锁管理器

use std::time::Duration;

use redis::Client as RedisClient;
use sqlx::PgPool;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{PointsError, Result};

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 默认锁超时时间
    pub default_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(30),
        }
    }
}

/// 分布式锁管理器
pub struct LockManager {
    redis_client: Option<RedisClient>,
    pool: PgPool,
    config: LockConfig,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl LockManager {
    /// `redis_client` 为 None 时只使用数据库锁
    pub fn new(redis_client: Option<RedisClient>, pool: PgPool, config: LockConfig) -> Self {
        Self {
            redis_client,
            pool,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 尝试获取锁，不重试
    ///
    /// 锁被占用时立即返回 None
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn try_acquire(&self, key: &str, ttl: Option<Duration>) -> Result<Option<LockGuard>> {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let owner = lock_owner(&self.instance_id);

        if let Some(ref client) = self.redis_client {
            match try_redis_lock(client, key, &owner, ttl).await {
                Ok(true) => {
                    debug!(key = %key, owner = %owner, "Redis lock acquired");
                    return Ok(Some(LockGuard::new_redis(
                        key.to_string(),
                        owner,
                        client.clone(),
                    )));
                }
                Ok(false) => return Ok(None),
                Err(e) => {
                    warn!(key = %key, error = %e, "Redis lock failed, falling back to database");
                }
            }
        }

        self.try_db_lock(key, owner, ttl).await
    }

    /// INSERT ON CONFLICT DO NOTHING 原子抢锁，先清理已过期的锁
    async fn try_db_lock(&self, key: &str, owner: String, ttl: Duration) -> Result<Option<LockGuard>> {
        let expires_at = chrono::Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| PointsError::Internal(e.to_string()))?;

        let deleted =
            sqlx::query(r#"DELETE FROM distributed_locks WHERE lock_key = $1 AND expires_at < NOW()"#)
                .bind(key)
                .execute(&self.pool)
                .await?;

        if deleted.rows_affected() > 0 {
            debug!(key = %key, "Cleaned up expired database lock");
        }

        let result = sqlx::query(
            r#"
            INSERT INTO distributed_locks (lock_key, owner_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (lock_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(owner.as_str())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(key = %key, owner = %owner, "Database lock acquired");
            Ok(Some(LockGuard::new_db(
                key.to_string(),
                owner,
                self.pool.clone(),
            )))
        } else {
            Ok(None)
        }
    }
}

/// owner 格式: instance_id:uuid
fn lock_owner(instance_id: &str) -> String {
    format!("{}:{}", instance_id, Uuid::new_v4())
}

fn redis_lock_key(key: &str) -> String {
    format!("lock:{}", key)
}

/// SET NX PX 原子抢锁
async fn try_redis_lock(
    client: &RedisClient,
    key: &str,
    owner: &str,
    ttl: Duration,
) -> std::result::Result<bool, String> {
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| e.to_string())?;

    let result: Option<String> = redis::cmd("SET")
        .arg(redis_lock_key(key))
        .arg(owner)
        .arg("NX")
        .arg("PX")
        .arg(ttl.as_millis() as u64)
        .query_async(&mut conn)
        .await
        .map_err(|e| e.to_string())?;

    Ok(result.is_some())
}

/// 只有 owner 匹配时才删除
const RELEASE_SCRIPT: &str = r#"
    if redis.call("get", KEYS[1]) == ARGV[1] then
        return redis.call("del", KEYS[1])
    else
        return 0
    end
"#;

/// 锁守卫
///
/// Drop 无法执行异步释放，需调用 `release()`；未释放的锁依赖 TTL 过期。
pub struct LockGuard {
    key: String,
    owner: String,
    backend: LockBackend,
    released: bool,
}

enum LockBackend {
    Redis(RedisClient),
    Database(PgPool),
}

impl LockGuard {
    fn new_redis(key: String, owner: String, client: RedisClient) -> Self {
        Self {
            key,
            owner,
            backend: LockBackend::Redis(client),
            released: false,
        }
    }

    fn new_db(key: String, owner: String, pool: PgPool) -> Self {
        Self {
            key,
            owner,
            backend: LockBackend::Database(pool),
            released: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 显式释放锁
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let released = match &self.backend {
            LockBackend::Redis(client) => self.release_redis(client).await?,
            LockBackend::Database(pool) => self.release_db(pool).await?,
        };

        if released {
            debug!(key = %self.key, "Lock released");
        } else {
            warn!(
                key = %self.key,
                owner = %self.owner,
                "Lock was already released or owned by another client"
            );
        }
        Ok(())
    }

    async fn release_redis(&self, client: &RedisClient) -> Result<bool> {
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PointsError::Redis(e.to_string()))?;

        let deleted: i32 = redis::Script::new(RELEASE_SCRIPT)
            .key(redis_lock_key(&self.key))
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| PointsError::Redis(e.to_string()))?;

        Ok(deleted > 0)
    }

    async fn release_db(&self, pool: &PgPool) -> Result<bool> {
        let result =
            sqlx::query(r#"DELETE FROM distributed_locks WHERE lock_key = $1 AND owner_id = $2"#)
                .bind(&self.key)
                .bind(&self.owner)
                .execute(pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                lock_key = %self.key,
                owner = %self.owner,
                "LockGuard dropped without explicit release - lock will expire via TTL"
            );
        }
    }
}
