pub mod chat;
pub mod message;
pub mod user;

/// Milliseconds since the unix epoch, the unit used for every timestamp.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
