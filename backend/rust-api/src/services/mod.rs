use std::sync::Arc;

use crate::config::Config;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use answer_cache::{AnswerCache, RedisAnswerCache};
use attempt_service::LessonAttemptService;
use attempt_store::{AttemptStore, MongoAttemptStore};
use question_catalog::{MongoQuestionCatalog, QuestionCatalog};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn AttemptStore>,
    pub cache: Arc<dyn AnswerCache>,
    pub catalog: Arc<dyn QuestionCatalog>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let store = MongoAttemptStore::new(mongo.clone());
        store.ensure_indexes().await?;

        let cache = RedisAnswerCache::new(redis, config.attempt_cache_ttl_seconds);
        let catalog = MongoQuestionCatalog::new(mongo);

        Ok(Self::from_parts(
            config,
            Arc::new(store),
            Arc::new(cache),
            Arc::new(catalog),
        ))
    }

    /// Assemble state from already constructed backends.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn AttemptStore>,
        cache: Arc<dyn AnswerCache>,
        catalog: Arc<dyn QuestionCatalog>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            catalog,
        }
    }

    pub fn attempt_service(&self) -> LessonAttemptService {
        LessonAttemptService::new(
            self.store.clone(),
            self.cache.clone(),
            self.catalog.clone(),
        )
    }
}

pub mod answer_cache;
pub mod attempt_service;
pub mod attempt_store;
#[cfg(any(test, feature = "test-utils"))]
pub mod in_memory;
pub mod question_catalog;
