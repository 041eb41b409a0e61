pub mod generation_record_repo;

pub use generation_record_repo::GenerationRecordRepo;
