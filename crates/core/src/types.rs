/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// External session identity; also the key prefix for stored artifacts.
pub type SessionId = String;
