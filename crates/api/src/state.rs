use std::sync::Arc;

use booth_pipeline::JobFacade;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything inside is behind `Arc` or already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Submit/poll facade over the generation runner.
    pub facade: Arc<JobFacade>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Database pool, when job status is persisted to PostgreSQL.
    pub pool: Option<booth_db::DbPool>,
}
