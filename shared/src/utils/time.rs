//! Time utilities
//!
//! Every timestamp in the runtime is a single `i64` of monotonic
//! nanoseconds. Unset fields hold the far-future sentinel so that
//! not-yet-running records compare as "not started" under the windowing
//! predicate; the `(sec, nsec)` split only exists at serialization
//! boundaries.

use std::time::Duration;

/// Far-future sentinel for timestamps that have not been measured yet.
pub const SENTINEL_NANOS: i64 = i64::MAX;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Current monotonic time in nanoseconds.
pub fn monotonic_nanos() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: plain out-parameter syscall; CLOCK_MONOTONIC is always valid.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as i64 * NANOS_PER_SEC + ts.tv_nsec as i64
}

/// Sleep until an absolute monotonic deadline, in nanoseconds.
///
/// Returns immediately when the deadline has already passed. Deadlines are
/// advanced by whole periods by the callers, so scheduling drift does not
/// accumulate across iterations.
pub fn sleep_until(deadline_nanos: i64) {
    let now = monotonic_nanos();
    if deadline_nanos > now {
        std::thread::sleep(Duration::from_nanos((deadline_nanos - now) as u64));
    }
}

/// Convert milliseconds to nanoseconds.
pub fn millis_to_nanos(ms: i64) -> i64 {
    ms * 1_000_000
}

/// Split nanoseconds into the on-disk `(sec, nsec)` pair.
///
/// The sentinel is preserved as `(i64::MAX, i64::MAX)` so unset fields keep
/// their conventional representation in binary outputs.
pub fn split_nanos(nanos: i64) -> (i64, i64) {
    if nanos == SENTINEL_NANOS {
        return (i64::MAX, i64::MAX);
    }
    (nanos / NANOS_PER_SEC, nanos % NANOS_PER_SEC)
}

/// Inverse of [`split_nanos`], used when reading records back.
pub fn join_nanos(sec: i64, nsec: i64) -> i64 {
    if sec == i64::MAX && nsec == i64::MAX {
        return SENTINEL_NANOS;
    }
    sec * NANOS_PER_SEC + nsec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_nanos_advances() {
        let a = monotonic_nanos();
        let b = monotonic_nanos();
        assert!(b >= a);
        assert!(a > 0);
    }

    #[test]
    fn test_split_round_trip() {
        let nanos = 12 * NANOS_PER_SEC + 345_678_901;
        let (sec, nsec) = split_nanos(nanos);
        assert_eq!(sec, 12);
        assert_eq!(nsec, 345_678_901);
        assert_eq!(join_nanos(sec, nsec), nanos);
    }

    #[test]
    fn test_sentinel_preserved() {
        let (sec, nsec) = split_nanos(SENTINEL_NANOS);
        assert_eq!((sec, nsec), (i64::MAX, i64::MAX));
        assert_eq!(join_nanos(sec, nsec), SENTINEL_NANOS);
    }

    #[test]
    fn test_sleep_until_past_deadline_returns() {
        // A deadline in the past must not block.
        sleep_until(monotonic_nanos() - NANOS_PER_SEC);
    }
}
