use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Milliseconds since the Unix epoch at which platform identifiers start counting.
pub const ID_EPOCH_MILLIS: i64 = 1_288_834_974_657;

/// Low bits of an identifier reserved for worker and sequence numbers.
pub const SEQUENCE_BITS: u32 = 22;

/// Decode the creation time embedded in a snowflake-style identifier.
pub fn decode(id: &str) -> Result<DateTime<Utc>> {
    let n: u64 = id.parse().map_err(|source| Error::InvalidIdentifier {
        id: id.to_string(),
        source,
    })?;
    Ok(from_raw(n))
}

/// `n >> 22` is at most 2^42, so the sum always stays within chrono's range.
pub fn from_raw(n: u64) -> DateTime<Utc> {
    let millis = ID_EPOCH_MILLIS + (n >> SEQUENCE_BITS) as i64;
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
