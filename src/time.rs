//! Time model - TimePoint, Duration and the process clock
//!
//! All instants share one microsecond time axis whose zero is captured the
//! first time the process clock is consulted. Intervals are signed.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::sync::OnceLock;
use std::time::Instant;
use thiserror::Error;

const US_PER_MS: i64 = 1_000;
const US_PER_S: i64 = 1_000_000;

static ZERO_TIME: OnceLock<Instant> = OnceLock::new();

fn zero_time() -> Instant {
    *ZERO_TIME.get_or_init(Instant::now)
}

/// Errors from converting between time representations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeError {
    /// The result does not fit in the microsecond range.
    #[error("time arithmetic overflowed")]
    Overflow,

    /// A negative interval can't be turned into an unsigned one.
    #[error("duration {0} is negative")]
    Negative(Duration),
}

/// A signed time interval with microsecond resolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration {
    us: i64,
}

impl Duration {
    pub const ZERO: Duration = Duration { us: 0 };
    pub const MAX: Duration = Duration { us: i64::MAX };
    pub const MIN: Duration = Duration { us: i64::MIN };

    /// Create a duration from (possibly fractional) seconds, rounded to the
    /// nearest microsecond. Non-finite input and out of range values clamp.
    pub fn from_secs_f64(seconds: f64) -> Self {
        if seconds.is_nan() {
            return Self::ZERO;
        }
        // `as` saturates for out of range floats
        Self {
            us: (seconds * US_PER_S as f64).round() as i64,
        }
    }

    pub const fn from_secs(s: i64) -> Self {
        Self {
            us: s.saturating_mul(US_PER_S),
        }
    }

    pub const fn from_millis(ms: i64) -> Self {
        Self {
            us: ms.saturating_mul(US_PER_MS),
        }
    }

    pub const fn from_micros(us: i64) -> Self {
        Self { us }
    }

    /// Whole seconds, truncated toward zero.
    pub const fn as_secs(&self) -> i64 {
        self.us / US_PER_S
    }

    /// Whole milliseconds, truncated toward zero.
    pub const fn as_millis(&self) -> i64 {
        self.us / US_PER_MS
    }

    pub const fn as_micros(&self) -> i64 {
        self.us
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.us as f64 / US_PER_S as f64
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.us as f64 / US_PER_MS as f64
    }

    pub const fn is_negative(&self) -> bool {
        self.us < 0
    }

    pub const fn abs(&self) -> Self {
        Self {
            us: self.us.saturating_abs(),
        }
    }

    pub fn checked_add(self, other: Duration) -> Option<Duration> {
        self.us.checked_add(other.us).map(Duration::from_micros)
    }

    pub fn checked_sub(self, other: Duration) -> Option<Duration> {
        self.us.checked_sub(other.us).map(Duration::from_micros)
    }

    pub fn checked_mul(self, scalar: i64) -> Option<Duration> {
        self.us.checked_mul(scalar).map(Duration::from_micros)
    }

    /// Integer division; `None` when dividing by zero.
    pub fn checked_div(self, scalar: i64) -> Option<Duration> {
        self.us.checked_div(scalar).map(Duration::from_micros)
    }

    /// Scale by a real factor, rounding to the nearest microsecond.
    pub fn mul_f64(self, factor: f64) -> Duration {
        Duration::from_micros((self.us as f64 * factor).round() as i64)
    }

    /// How many whole `other` intervals fit in `self`; `None` when `other` is zero.
    pub fn checked_ratio(self, other: Duration) -> Option<i64> {
        self.us.checked_div(other.us)
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration::from_micros(self.us.saturating_add(rhs.us))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration::from_micros(self.us.saturating_sub(rhs.us))
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Duration {
        Duration::from_micros(self.us.saturating_neg())
    }
}

impl Mul<i64> for Duration {
    type Output = Duration;

    fn mul(self, rhs: i64) -> Duration {
        Duration::from_micros(self.us.saturating_mul(rhs))
    }
}

impl Mul<f64> for Duration {
    type Output = Duration;

    fn mul(self, rhs: f64) -> Duration {
        self.mul_f64(rhs)
    }
}

impl Div<i64> for Duration {
    type Output = Duration;

    /// Panics on division by zero, like integer division.
    fn div(self, rhs: i64) -> Duration {
        Duration::from_micros(self.us / rhs)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Duration::from_micros(i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
    }
}

impl TryFrom<Duration> for std::time::Duration {
    type Error = TimeError;

    fn try_from(d: Duration) -> Result<Self, Self::Error> {
        if d.is_negative() {
            return Err(TimeError::Negative(d));
        }
        Ok(std::time::Duration::from_micros(d.us as u64))
    }
}

/// An absolute instant on the process time axis.
///
/// Equality is exact. Only compare TimePoints that come from the same
/// clock: the realtime [`Clock`] and an offline main loop's virtual time
/// both start at zero but are not related.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimePoint {
    ticks_since_start: i64,
}

impl TimePoint {
    /// The zero instant of the time axis.
    pub const ZERO: TimePoint = TimePoint {
        ticks_since_start: 0,
    };

    pub const fn from_micros_since_start(us: i64) -> Self {
        Self {
            ticks_since_start: us,
        }
    }

    pub const fn micros_since_start(&self) -> i64 {
        self.ticks_since_start
    }

    /// The interval between the time axis zero and this instant.
    pub const fn duration_since_start(&self) -> Duration {
        Duration::from_micros(self.ticks_since_start)
    }

    pub fn checked_add(self, d: Duration) -> Option<TimePoint> {
        self.ticks_since_start
            .checked_add(d.as_micros())
            .map(TimePoint::from_micros_since_start)
    }

    pub fn checked_sub(self, d: Duration) -> Option<TimePoint> {
        self.ticks_since_start
            .checked_sub(d.as_micros())
            .map(TimePoint::from_micros_since_start)
    }

    /// `self - earlier`, or `None` if it doesn't fit.
    pub fn checked_duration_since(self, earlier: TimePoint) -> Option<Duration> {
        self.ticks_since_start
            .checked_sub(earlier.ticks_since_start)
            .map(Duration::from_micros)
    }

    /// Convert a reading of the std monotonic clock onto this time axis.
    pub fn from_instant(instant: Instant) -> Result<Self, TimeError> {
        let zero = zero_time();
        let us = if instant >= zero {
            i64::try_from(instant.duration_since(zero).as_micros())
                .map_err(|_| TimeError::Overflow)?
        } else {
            let before = i64::try_from(zero.duration_since(instant).as_micros())
                .map_err(|_| TimeError::Overflow)?;
            -before
        };
        Ok(Self::from_micros_since_start(us))
    }
}

impl Add<Duration> for TimePoint {
    type Output = TimePoint;

    fn add(self, rhs: Duration) -> TimePoint {
        TimePoint::from_micros_since_start(self.ticks_since_start.saturating_add(rhs.as_micros()))
    }
}

impl AddAssign<Duration> for TimePoint {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Duration> for TimePoint {
    type Output = TimePoint;

    fn sub(self, rhs: Duration) -> TimePoint {
        TimePoint::from_micros_since_start(self.ticks_since_start.saturating_sub(rhs.as_micros()))
    }
}

impl SubAssign<Duration> for TimePoint {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Sub for TimePoint {
    type Output = Duration;

    fn sub(self, rhs: TimePoint) -> Duration {
        Duration::from_micros(self.ticks_since_start.saturating_sub(rhs.ticks_since_start))
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}", self.duration_since_start())
    }
}

/// The process-wide monotonic clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock;

impl Clock {
    pub fn new() -> Self {
        // Pin the zero time so the first reading is close to zero.
        let _ = zero_time();
        Self
    }

    /// Current instant of the monotonic clock.
    pub fn now(&self) -> TimePoint {
        let us = Instant::now().duration_since(zero_time()).as_micros();
        TimePoint::from_micros_since_start(i64::try_from(us).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_units() {
        let d = Duration::from_millis(1500);
        assert_eq!(d.as_micros(), 1_500_000);
        assert_eq!(d.as_millis(), 1500);
        assert_eq!(d.as_secs(), 1);
        assert!((d.as_secs_f64() - 1.5).abs() < 1e-12);

        let d = Duration::from_secs_f64(0.2500004);
        assert_eq!(d.as_micros(), 250_000);
    }

    #[test]
    fn test_millis_to_seconds() {
        for ms in [-2500_i64, -1, 0, 1, 16, 100, 1000, 123_456] {
            let d = Duration::from_millis(ms);
            assert!((d.as_secs_f64() - ms as f64 / 1000.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_negative_durations() {
        let d = Duration::from_millis(-250);
        assert!(d.is_negative());
        assert_eq!(d.abs(), Duration::from_millis(250));
        assert_eq!(-d, Duration::from_millis(250));
        assert_eq!(d.as_millis(), -250);
        assert!(std::time::Duration::try_from(d).is_err());
    }

    #[test]
    fn test_duration_scaling() {
        let d = Duration::from_millis(100);
        assert_eq!(d * 3, Duration::from_millis(300));
        assert_eq!(d * 0.5, Duration::from_millis(50));
        assert_eq!(d.mul_f64(-1.5), Duration::from_millis(-150));
        assert_eq!(d / 4, Duration::from_micros(25_000));
        assert_eq!(Duration::from_secs(1).checked_ratio(d), Some(10));
        assert_eq!(d.checked_ratio(Duration::ZERO), None);
        assert_eq!(d.checked_div(0), None);
    }

    #[test]
    fn test_duration_overflow() {
        assert_eq!(Duration::MAX.checked_add(Duration::from_micros(1)), None);
        assert_eq!(Duration::MAX + Duration::from_micros(1), Duration::MAX);
        assert_eq!(Duration::MIN.checked_mul(2), None);
    }

    #[test]
    fn test_time_point_arithmetic() {
        let a = TimePoint::from_micros_since_start(1_000_000);
        let b = TimePoint::from_micros_since_start(250_000);

        assert_eq!(-(a - b), b - a);
        assert_eq!((a - b).as_millis(), 750);

        for d in [
            Duration::ZERO,
            Duration::from_millis(16),
            Duration::from_secs(-3),
            Duration::from_micros(7),
        ] {
            assert_eq!((a + d) - d, a);
            assert_eq!((a - d) + d, a);
            assert_eq!((a + d) - a, d);
        }
    }

    #[test]
    fn test_time_point_comparisons() {
        let a = TimePoint::from_micros_since_start(10);
        let b = TimePoint::from_micros_since_start(20);
        assert!(a < b);
        assert!(a <= b);
        assert!(b > a);
        assert!(b >= a);
        assert!(a != b);
        assert!(a == TimePoint::from_micros_since_start(10));
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = Clock::new();
        let t0 = clock.now();
        let t1 = clock.now();
        assert!(t1 >= t0);
        assert!(t0 >= TimePoint::ZERO);
    }

    #[test]
    fn test_from_instant_matches_clock_axis() {
        let clock = Clock::new();
        let before = clock.now();
        let tp = TimePoint::from_instant(Instant::now()).unwrap();
        let after = clock.now();
        assert!(before <= tp && tp <= after);
    }
}
