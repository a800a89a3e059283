/// UTC timestamp used in persisted job records.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
