//! Millisecond unix timestamps, the on-disk representation of every date column.

use time::OffsetDateTime;

const NANOS_PER_MILLI: i128 = 1_000_000;

#[must_use]
pub fn unix_millis(at: OffsetDateTime) -> i64 {
    let millis = at.unix_timestamp_nanos() / NANOS_PER_MILLI;
    i64::try_from(millis).unwrap_or(if millis.is_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// Converts a stored millisecond timestamp back into a date.
///
/// Returns `None` when the value falls outside the range `time` can represent.
#[must_use]
pub fn from_unix_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * NANOS_PER_MILLI).ok()
}
