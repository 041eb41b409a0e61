pub mod blobs;
pub mod jobs;
