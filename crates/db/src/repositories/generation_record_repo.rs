//! Repository for the `generation_records` table.

use sqlx::PgPool;

use crate::models::generation_record::{GenerationRecord, MergeGenerationRecord};

/// Column list for `generation_records` queries.
const COLUMNS: &str = "\
    session_id, prompt_id, prompt, status, progress, generation_count, \
    generation_start_times, generation_end_times, error, created_at, updated_at";

/// Provides query operations for generation status documents.
pub struct GenerationRecordRepo;

impl GenerationRecordRepo {
    // ── Queries ──────────────────────────────────────────────────────

    /// Find the record for a session.
    pub async fn find_by_session(
        pool: &PgPool,
        session_id: &str,
    ) -> Result<Option<GenerationRecord>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_records WHERE session_id = $1");
        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(session_id)
            .fetch_optional(pool)
            .await
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Merge a partial update into the session's record, creating it if
    /// absent. Omitted fields keep their stored value; the counter is
    /// incremented and the timestamp arrays are appended to. `error` is
    /// reset when the input asks for it.
    pub async fn merge(
        pool: &PgPool,
        session_id: &str,
        input: &MergeGenerationRecord,
    ) -> Result<GenerationRecord, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_records \
                (session_id, prompt_id, prompt, status, progress, generation_count, \
                 generation_start_times, generation_end_times, error) \
             VALUES ($1, $2, $3, $4, COALESCE($5::SMALLINT, 0), $6, $7, $8, $9) \
             ON CONFLICT (session_id) DO UPDATE SET \
                prompt_id = COALESCE(EXCLUDED.prompt_id, generation_records.prompt_id), \
                prompt = COALESCE(EXCLUDED.prompt, generation_records.prompt), \
                status = COALESCE(EXCLUDED.status, generation_records.status), \
                progress = COALESCE($5::SMALLINT, generation_records.progress), \
                generation_count = generation_records.generation_count + EXCLUDED.generation_count, \
                generation_start_times = generation_records.generation_start_times \
                    || EXCLUDED.generation_start_times, \
                generation_end_times = generation_records.generation_end_times \
                    || EXCLUDED.generation_end_times, \
                error = CASE WHEN $10::BOOLEAN THEN EXCLUDED.error \
                    ELSE COALESCE(EXCLUDED.error, generation_records.error) END, \
                updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(session_id)
            .bind(&input.prompt_id)
            .bind(&input.prompt)
            .bind(&input.status)
            .bind(input.progress)
            .bind(input.generation_increment)
            .bind(&input.start_times)
            .bind(&input.end_times)
            .bind(&input.error)
            .bind(input.clear_error)
            .fetch_one(pool)
            .await
    }
}
