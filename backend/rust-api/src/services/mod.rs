use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;

use crate::config::Config;
use ocr_service::{GoogleVisionOcr, OcrEngine, OcrService};
use progress_store::{InMemoryProgressStore, ProgressStore, RedisProgressStore};
use session_service::SessionService;
use tutor_service::{OpenAiBackend, TutorBackend, TutorService};

const SESSION_SWEEP_PERIOD: Duration = Duration::from_secs(60);

pub struct AppState {
    pub config: Config,
    pub sessions: SessionService,
    pub tutor: TutorService,
    pub progress: Arc<dyn ProgressStore>,
    pub ocr: OcrService,
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let progress: Arc<dyn ProgressStore> = match &config.redis_uri {
            Some(uri) => Arc::new(RedisProgressStore::new(connect_redis(uri).await?)),
            None => {
                tracing::warn!("REDIS_URI not set; learner progress is kept in memory only");
                Arc::new(InMemoryProgressStore::new())
            }
        };

        let backend: Arc<dyn TutorBackend> = Arc::new(OpenAiBackend::new(&config.tutor)?);

        let engine: Option<Arc<dyn OcrEngine>> = match &config.google_vision_api_key {
            Some(key) => Some(Arc::new(GoogleVisionOcr::new(
                key.clone(),
                Duration::from_secs(config.tutor.timeout_seconds),
            )?)),
            None => {
                tracing::info!("GOOGLE_VISION_API_KEY not set; uploads return a preview only");
                None
            }
        };

        let state = Self::with_components(config, backend, progress, OcrService::new(engine));
        let ttl = state.sessions.ttl();
        state.sessions.spawn_sweeper(ttl.min(SESSION_SWEEP_PERIOD));
        tracing::info!("Sessions expire after {}s of inactivity", ttl.as_secs());

        Ok(state)
    }

    /// Assembles state from ready-made collaborators.
    pub fn with_components(
        config: Config,
        backend: Arc<dyn TutorBackend>,
        progress: Arc<dyn ProgressStore>,
        ocr: OcrService,
    ) -> Self {
        let tutor = TutorService::new(backend, &config.tutor);
        let sessions = SessionService::new(Duration::from_secs(config.session_ttl_seconds));
        Self {
            config,
            sessions,
            tutor,
            progress,
            ocr,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    let client = redis::Client::open(uri)?;

    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(Duration::from_secs(30), ConnectionManager::new(client))
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    tracing::info!("Redis ConnectionManager created, testing with PING...");

    let mut conn = redis.clone();
    tokio::time::timeout(
        Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

pub mod ocr_service;
pub mod progress_store;
pub mod session_service;
pub mod tutor_service;
