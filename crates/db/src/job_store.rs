use async_trait::async_trait;
use booth_core::tracker::{JobPatch, JobRecord, JobStore, StoreError};

use crate::models::generation_record::MergeGenerationRecord;
use crate::repositories::GenerationRecordRepo;
use crate::DbPool;

/// [`JobStore`] backed by the `generation_records` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn store_error(e: sqlx::Error) -> StoreError {
    StoreError(e.to_string())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn merge(&self, session_id: &str, patch: JobPatch) -> Result<JobRecord, StoreError> {
        let input = MergeGenerationRecord::from(patch);
        GenerationRecordRepo::merge(&self.pool, session_id, &input)
            .await
            .map(JobRecord::from)
            .map_err(store_error)
    }

    async fn get(&self, session_id: &str) -> Result<Option<JobRecord>, StoreError> {
        GenerationRecordRepo::find_by_session(&self.pool, session_id)
            .await
            .map(|row| row.map(JobRecord::from))
            .map_err(store_error)
    }
}
