use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod invite;
pub mod room;

fn format_millis(epoch_ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
