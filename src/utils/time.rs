use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Sentinel expiry meaning "never expires"
pub const FOREVER_MS: u64 = u64::MAX;

/// return millisecond since epoch
pub fn get_now_as_u64_ms() -> u64 {
    let now = SystemTime::now();
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Converts a relative lease duration into an absolute expiry (ms since epoch).
///
/// `None` means the lease never expires. Saturates instead of overflowing.
pub fn expiry_from_now(duration: Option<Duration>) -> u64 {
    match duration {
        None => FOREVER_MS,
        Some(d) => get_now_as_u64_ms().saturating_add(d.as_millis().min(u64::MAX as u128) as u64),
    }
}

/// Whether an absolute expiry has elapsed at `now_ms`
pub fn is_expired(
    expiry_ms: u64,
    now_ms: u64,
) -> bool {
    expiry_ms != FOREVER_MS && now_ms >= expiry_ms
}
