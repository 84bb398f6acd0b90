use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::errors::StoreError;
use crate::metrics::track_cache_operation;
use crate::models::{CachedPageAnswer, QuestionPageAttempt};

/// Fast, non-durable store of the answers given during an open lesson attempt.
#[async_trait]
pub trait AnswerCache: Send + Sync {
    /// Upsert the answer of one page attempt. Last write wins.
    async fn write(
        &self,
        lesson_attempt_id: i64,
        page_attempt_id: i64,
        answer: &CachedPageAnswer,
    ) -> Result<(), StoreError>;

    /// Upsert several page answers in one atomic step: either all entries land or none do.
    async fn write_all(
        &self,
        lesson_attempt_id: i64,
        answers: &[(i64, CachedPageAnswer)],
    ) -> Result<(), StoreError>;

    /// The cached answer of one page attempt, `None` when the page attempt was never seeded.
    async fn read(
        &self,
        lesson_attempt_id: i64,
        page_attempt_id: i64,
    ) -> Result<Option<CachedPageAnswer>, StoreError>;

    /// Every cached page attempt of a lesson attempt, ordered by page attempt id.
    /// Empty when the cache is cold.
    async fn read_all(&self, lesson_attempt_id: i64) -> Result<Vec<QuestionPageAttempt>, StoreError>;

    /// Drop the lesson attempt's entries.
    async fn clear(&self, lesson_attempt_id: i64) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// One hash per lesson attempt, one field per page attempt holding a JSON answer.
pub struct RedisAnswerCache {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisAnswerCache {
    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }
}

pub(crate) fn attempt_key(lesson_attempt_id: i64) -> String {
    format!("lesson_attempt:{}", lesson_attempt_id)
}

pub(crate) fn page_field(page_attempt_id: i64) -> String {
    format!("page_attempt:{}", page_attempt_id)
}

pub(crate) fn parse_page_field(field: &str) -> Option<i64> {
    field.strip_prefix("page_attempt:")?.parse().ok()
}

#[async_trait]
impl AnswerCache for RedisAnswerCache {
    async fn write(
        &self,
        lesson_attempt_id: i64,
        page_attempt_id: i64,
        answer: &CachedPageAnswer,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let key = attempt_key(lesson_attempt_id);
        let value = serde_json::to_string(answer)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&key)
            .arg(page_field(page_attempt_id))
            .arg(&value)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .ignore();

        track_cache_operation("hset", async {
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await
    }

    async fn write_all(
        &self,
        lesson_attempt_id: i64,
        answers: &[(i64, CachedPageAnswer)],
    ) -> Result<(), StoreError> {
        if answers.is_empty() {
            return Ok(());
        }

        let mut conn = self.redis.clone();
        let key = attempt_key(lesson_attempt_id);

        let mut hset = redis::cmd("HSET");
        hset.arg(&key);
        for (page_attempt_id, answer) in answers {
            hset.arg(page_field(*page_attempt_id))
                .arg(serde_json::to_string(answer)?);
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .add_command(hset)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_seconds)
            .ignore();

        track_cache_operation("hset_batch", async {
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await
    }

    async fn read(
        &self,
        lesson_attempt_id: i64,
        page_attempt_id: i64,
    ) -> Result<Option<CachedPageAnswer>, StoreError> {
        let mut conn = self.redis.clone();
        let key = attempt_key(lesson_attempt_id);

        let value: Option<String> = track_cache_operation("hget", async {
            redis::cmd("HGET")
                .arg(&key)
                .arg(page_field(page_attempt_id))
                .query_async(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await?;

        value
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    async fn read_all(&self, lesson_attempt_id: i64) -> Result<Vec<QuestionPageAttempt>, StoreError> {
        let mut conn = self.redis.clone();
        let key = attempt_key(lesson_attempt_id);

        let fields: HashMap<String, String> = track_cache_operation("hgetall", async {
            redis::cmd("HGETALL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await?;

        let mut attempts = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            let page_attempt_id = parse_page_field(&field).ok_or_else(|| {
                StoreError::Malformed(format!("unexpected field {} in {}", field, key))
            })?;
            let answer: CachedPageAnswer = serde_json::from_str(&value)?;
            attempts.push(answer.into_page_attempt(lesson_attempt_id, page_attempt_id));
        }
        attempts.sort_by_key(|attempt| attempt.id);

        Ok(attempts)
    }

    async fn clear(&self, lesson_attempt_id: i64) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let key = attempt_key(lesson_attempt_id);

        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(StoreError::from)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(StoreError::from)
    }
}
