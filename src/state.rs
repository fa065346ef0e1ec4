use crate::config::{AppConfig, JwtConfig, StoreBackend};
use crate::store::{MemoryStore, PgStore, Store};
use anyhow::Context;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match config.backend {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL missing")?;
                let pg = PgStore::connect(url, config.max_connections).await?;

                pg.migrate().await?;
                tracing::info!("migrations applied");
                Arc::new(pg) as Arc<dyn Store>
            }
            StoreBackend::Memory => {
                tracing::warn!("using in-memory store; data is lost on restart");
                Arc::new(MemoryStore::new()) as Arc<dyn Store>
            }
        };

        Ok(Self { store, config })
    }

    /// In-memory state for tests.
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 1,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                refresh_ttl_minutes: 60,
            },
        });

        Self {
            store: Arc::new(MemoryStore::new()),
            config,
        }
    }
}
