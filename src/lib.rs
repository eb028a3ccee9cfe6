pub mod activity;
pub mod config;
pub mod database;
pub mod errors;
pub mod recommendations;

use activity::SqliteActivityStore;
use config::RecommendationConfig;
use database::DatabaseManager;
use errors::AppError;
use std::sync::Arc;

pub use recommendations::{RecommendationEngine, RecommendationError};

/// Open the database at the configured path and wire an engine over it.
pub async fn setup(config: &RecommendationConfig) -> Result<RecommendationEngine, AppError> {
    let db = DatabaseManager::new(&config.database_path).await?;
    log::info!("Database ready at {:?}", config.database_path);

    let store = Arc::new(SqliteActivityStore::new(db.pool.clone()));
    RecommendationEngine::from_config(config, store, db.pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_creates_database_and_serves_health() {
        let dir = std::env::temp_dir().join(format!("folio-setup-{}", uuid::Uuid::new_v4()));
        let config = RecommendationConfig {
            database_path: dir.join("folio.db"),
            ..RecommendationConfig::default()
        };

        let engine = setup(&config).await.unwrap();
        assert!(config.database_path.exists());

        let report = engine.test_system_health().await;
        assert!(!report.openai_available);
        assert!(report.fallback_working);
        assert!(report.cache_working);

        let _ = std::fs::remove_dir_all(dir);
    }
}
