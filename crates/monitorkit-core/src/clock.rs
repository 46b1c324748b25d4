//! Clock collaborator: the wait clock and deadline arithmetic.
//!
//! Timed waits compute an absolute [`Deadline`] once, when the wait begins, on
//! the same clock the condition primitive measures against. On Linux and
//! Android that is `CLOCK_MONOTONIC` (selected on the condition through
//! `pthread_condattr_setclock`); other unix targets use `CLOCK_REALTIME`;
//! non-unix targets measure from a process-local [`Instant`] origin.

use std::time::Duration;
#[cfg(not(unix))]
use std::time::Instant;

const NANOS_PER_MILLI: u64 = 1_000_000;
#[cfg(unix)]
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Clock the wait primitive measures deadlines against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockSource {
    Monotonic,
    Realtime,
}

/// The clock used by [`now`] and by the native condition primitive.
#[must_use]
pub const fn wait_clock() -> ClockSource {
    if cfg!(any(target_os = "linux", target_os = "android", not(unix))) {
        ClockSource::Monotonic
    } else {
        ClockSource::Realtime
    }
}

#[cfg(unix)]
pub(crate) const fn clock_id(source: ClockSource) -> libc::clockid_t {
    match source {
        ClockSource::Monotonic => libc::CLOCK_MONOTONIC,
        ClockSource::Realtime => libc::CLOCK_REALTIME,
    }
}

/// A point on the wait clock, in nanoseconds since the clock's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    nanos: u64,
}

impl Timestamp {
    /// The far-future timestamp that saturating arithmetic clamps to.
    pub const MAX: Self = Self { nanos: u64::MAX };

    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.nanos
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.nanos / NANOS_PER_MILLI
    }

    /// `self + millis`, clamped to [`Timestamp::MAX`].
    #[must_use]
    pub const fn saturating_add_millis(self, millis: u64) -> Self {
        Self {
            nanos: self
                .nanos
                .saturating_add(millis.saturating_mul(NANOS_PER_MILLI)),
        }
    }

    /// Time from `earlier` to `self`, zero if `earlier` is later.
    #[must_use]
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }
}

/// Current time on the wait clock.
#[cfg(unix)]
#[must_use]
pub fn now() -> Timestamp {
    // SAFETY: timespec is plain old data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: `ts` is a valid out-pointer and the clock id is a constant the
    // platform supports.
    let rc = unsafe { libc::clock_gettime(clock_id(wait_clock()), &mut ts) };
    if rc != 0 {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        crate::error::primitive_failure("clock_gettime", errno);
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(ts.tv_nsec).unwrap_or(0);
    Timestamp::from_nanos(secs.saturating_mul(NANOS_PER_SEC).saturating_add(nanos))
}

/// Current time on the wait clock.
#[cfg(not(unix))]
#[must_use]
pub fn now() -> Timestamp {
    use std::sync::OnceLock;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = *ORIGIN.get_or_init(Instant::now);
    let elapsed = origin.elapsed().as_nanos();
    Timestamp::from_nanos(u64::try_from(elapsed).unwrap_or(u64::MAX))
}

/// An absolute point on the wait clock a timed wait blocks until.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Deadline {
    at: Timestamp,
}

impl Deadline {
    #[must_use]
    pub const fn at(self) -> Timestamp {
        self.at
    }

    /// True once `now` has reached the deadline.
    #[must_use]
    pub fn has_passed(self, now: Timestamp) -> bool {
        now >= self.at
    }

    /// Time left until the deadline, zero once passed.
    #[must_use]
    pub const fn remaining(self, now: Timestamp) -> Duration {
        self.at.saturating_duration_since(now)
    }

    /// Platform representation consumed by `pthread_cond_timedwait`.
    #[cfg(unix)]
    #[must_use]
    pub fn to_timespec(self) -> libc::timespec {
        let nanos = self.at.as_nanos();
        let secs = nanos / NANOS_PER_SEC;
        // SAFETY: timespec is plain old data; all-zero is a valid value.
        let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
        ts.tv_sec = libc::time_t::try_from(secs).unwrap_or(libc::time_t::MAX);
        // < 1e9, fits every tv_nsec type.
        ts.tv_nsec = (nanos % NANOS_PER_SEC) as _;
        ts
    }
}

/// Convert a relative timeout into an absolute deadline measured from `now`.
///
/// Overflow saturates to the far future rather than wrapping into the past.
#[must_use]
pub const fn to_absolute_deadline(now: Timestamp, relative_ms: u64) -> Deadline {
    Deadline {
        at: now.saturating_add_millis(relative_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_adds_millis() {
        let start = Timestamp::from_nanos(5 * NANOS_PER_MILLI);
        let deadline = to_absolute_deadline(start, 250);
        assert_eq!(deadline.at().as_millis(), 255);
        assert!(!deadline.has_passed(start));
        assert!(deadline.has_passed(Timestamp::from_nanos(255 * NANOS_PER_MILLI)));
        assert_eq!(deadline.remaining(start), Duration::from_millis(250));
    }

    #[test]
    fn deadline_overflow_saturates() {
        let start = Timestamp::from_nanos(u64::MAX - 10);
        assert_eq!(to_absolute_deadline(start, 1).at(), Timestamp::MAX);
        assert_eq!(
            to_absolute_deadline(Timestamp::from_nanos(1), u64::MAX).at(),
            Timestamp::MAX
        );
    }

    #[test]
    fn remaining_is_zero_after_deadline() {
        let deadline = to_absolute_deadline(Timestamp::default(), 1);
        assert_eq!(
            deadline.remaining(Timestamp::from_nanos(10 * NANOS_PER_MILLI)),
            Duration::ZERO
        );
    }

    #[test]
    fn now_is_monotone_across_calls() {
        let a = now();
        std::thread::sleep(Duration::from_millis(2));
        let b = now();
        assert!(b > a);
        assert!(b.saturating_duration_since(a) >= Duration::from_millis(2));
    }

    #[cfg(unix)]
    #[test]
    fn timespec_splits_seconds_and_nanos() {
        let deadline = to_absolute_deadline(Timestamp::from_nanos(1_500_000_000), 2_750);
        let ts = deadline.to_timespec();
        assert_eq!(ts.tv_sec, 4);
        assert_eq!(ts.tv_nsec, 250_000_000);
    }

    #[cfg(unix)]
    #[test]
    fn far_future_timespec_does_not_wrap() {
        let ts = Deadline { at: Timestamp::MAX }.to_timespec();
        assert!(ts.tv_sec > 0);
    }
}
