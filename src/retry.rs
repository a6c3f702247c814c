//! Backoff helpers shared by the Media Fetcher, Engine Client, Status
//! Reporter and Face-Swap Processor. All of them retry transient failures
//! with exponential backoff starting at 0.5s; engine connection-refused
//! is a special case that stays flat at 0.5s (the engine is still booting,
//! not genuinely failing).

use std::time::Duration;

const BASE_DELAY: Duration = Duration::from_millis(500);

/// Delay before retry attempt `attempt` (0-indexed): 0.5s, 1s, 2s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_DELAY * 2u32.pow(attempt)
}

/// Flat 0.5s delay, used for connection-refused retries against the engine:
/// the engine is still coming up, so backing off further doesn't
/// help, it just waits longer than necessary.
pub fn flat_engine_boot_delay() -> Duration {
    BASE_DELAY
}

pub fn is_retryable_error(status_code: u16) -> bool {
    crate::error::is_retryable_status(status_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_increases() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2), Duration::from_millis(2000));
    }

    #[test]
    fn boot_delay_is_flat() {
        assert_eq!(flat_engine_boot_delay(), Duration::from_millis(500));
    }
}

