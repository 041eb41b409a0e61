//! Generation status document models.

use booth_core::job::JobStatus;
use booth_core::tracker::{JobPatch, JobRecord};
use booth_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `generation_records` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct GenerationRecord {
    pub session_id: String,
    pub prompt_id: Option<String>,
    pub prompt: Option<String>,
    pub status: Option<String>,
    pub progress: i16,
    pub generation_count: i32,
    pub generation_start_times: Vec<Timestamp>,
    pub generation_end_times: Vec<Timestamp>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for merging a partial update into a record.
#[derive(Debug, Clone, Default)]
pub struct MergeGenerationRecord {
    pub prompt_id: Option<String>,
    pub prompt: Option<String>,
    pub status: Option<String>,
    pub progress: Option<i16>,
    /// Added to `generation_count`.
    pub generation_increment: i32,
    /// Appended to `generation_start_times`.
    pub start_times: Vec<Timestamp>,
    /// Appended to `generation_end_times`.
    pub end_times: Vec<Timestamp>,
    /// Reset `error` to NULL unless `error` is also set.
    pub clear_error: bool,
    pub error: Option<String>,
}

impl From<JobPatch> for MergeGenerationRecord {
    fn from(patch: JobPatch) -> Self {
        Self {
            prompt_id: patch.prompt_id,
            prompt: patch.prompt,
            status: patch.status.map(|s| s.as_str().to_string()),
            progress: patch.progress.map(i16::from),
            generation_increment: i32::from(patch.increment_generation),
            start_times: patch.append_start_time.into_iter().collect(),
            end_times: patch.append_end_time.into_iter().collect(),
            clear_error: patch.clear_error,
            error: patch.error,
        }
    }
}

impl From<GenerationRecord> for JobRecord {
    fn from(row: GenerationRecord) -> Self {
        Self {
            session_id: row.session_id,
            prompt_id: row.prompt_id,
            prompt: row.prompt,
            status: row.status.as_deref().and_then(JobStatus::from_name),
            progress: row.progress.clamp(0, 100) as u8,
            generation_count: row.generation_count.max(0) as u32,
            generation_start_times: row.generation_start_times,
            generation_end_times: row.generation_end_times,
            error: row.error,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn patch_converts_to_merge_input() {
        let now = Utc::now();
        let merge = MergeGenerationRecord::from(JobPatch {
            status: Some(JobStatus::Started),
            progress: Some(0),
            increment_generation: true,
            append_start_time: Some(now),
            clear_error: true,
            ..Default::default()
        });

        assert_eq!(merge.status.as_deref(), Some("started"));
        assert_eq!(merge.progress, Some(0));
        assert_eq!(merge.generation_increment, 1);
        assert_eq!(merge.start_times, vec![now]);
        assert!(merge.end_times.is_empty());
        assert!(merge.clear_error);
        assert_eq!(merge.error, None);
    }

    #[test]
    fn unknown_status_name_reads_as_none() {
        let now = Utc::now();
        let record = JobRecord::from(GenerationRecord {
            session_id: "s".into(),
            prompt_id: None,
            prompt: None,
            status: Some("bogus".into()),
            progress: 40,
            generation_count: 2,
            generation_start_times: vec![now],
            generation_end_times: vec![],
            error: None,
            created_at: now,
            updated_at: now,
        });

        assert_eq!(record.status, None);
        assert_eq!(record.progress, 40);
        assert_eq!(record.generation_count, 2);
    }
}
