use std::sync::Arc;

use tracing::info;

use super::{
    config::{Config, StorageBackend},
    database::RedisStore,
    enrollment::EnrollmentManager,
    error::AppError,
    memory::MemoryStore,
    store::Store,
};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub enrollments: EnrollmentManager,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, AppError> {
        let store: Arc<dyn Store> = match config.storage {
            StorageBackend::Memory => {
                info!("Using in-memory store, data is lost on shutdown");
                Arc::new(MemoryStore::new())
            }
            StorageBackend::Redis => Arc::new(
                RedisStore::connect(&config.redis_url)
                    .await
                    .map_err(|e| AppError::Internal(format!("Redis unavailable: {e}")))?,
            ),
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            config,
            enrollments: EnrollmentManager::new(store.clone()),
            store,
        })
    }
}
