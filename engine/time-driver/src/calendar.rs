//! Absolute simulated time to calendar fields, for display only

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;

/// Calendar breakdown of an absolute time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: f64,
}

/// The J2000 epoch, 2000-01-01T12:00:00, that absolute times count from
fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(12, 0, 0)
}

/// Convert seconds since J2000 into calendar fields.
///
/// Returns `None` for non-finite or out-of-range times.
pub fn abs_time_to_ymdhms(abs_time: f64) -> Option<CalendarTime> {
    if !abs_time.is_finite() {
        return None;
    }
    // Displayed to hundredths; round first so 59.996 carries into the minute
    let hundredths = (abs_time * 100.0).round();
    let whole = (hundredths / 100.0).floor();
    let fraction = (hundredths - whole * 100.0) / 100.0;
    let seconds = Duration::try_seconds(whole as i64)?;
    let at = epoch()?.checked_add_signed(seconds)?;

    Some(CalendarTime {
        year: at.year(),
        month: at.month(),
        day: at.day(),
        hour: at.hour(),
        minute: at.minute(),
        second: at.second() as f64 + fraction,
    })
}

impl fmt::Display for CalendarTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}/{:02}/{:02}T{:02}:{:02}:{:05.2}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch() {
        let time = abs_time_to_ymdhms(0.0).unwrap();
        assert_eq!((time.year, time.month, time.day, time.hour, time.minute), (2000, 1, 1, 12, 0));
        assert_eq!(time.second, 0.0);
    }

    #[test]
    fn test_fractional_seconds_and_rollover() {
        let time = abs_time_to_ymdhms(43_200.0 + 61.25).unwrap();
        assert_eq!((time.year, time.month, time.day), (2000, 1, 2));
        assert_eq!((time.hour, time.minute), (0, 1));
        assert!((time.second - 1.25).abs() < 1e-9);
        assert_eq!(time.to_string(), "2000/01/02T00:01:01.25");
    }

    #[test]
    fn test_before_epoch() {
        let time = abs_time_to_ymdhms(-43_200.5).unwrap();
        assert_eq!((time.year, time.month, time.day), (1999, 12, 31));
        assert_eq!((time.hour, time.minute), (23, 59));
        assert!((time.second - 59.5).abs() < 1e-9);
    }

    #[test]
    fn test_rounding_carries_into_the_minute() {
        let time = abs_time_to_ymdhms(59.996).unwrap();
        assert_eq!((time.hour, time.minute), (12, 1));
        assert_eq!(time.second, 0.0);
        assert_eq!(time.to_string(), "2000/01/01T12:01:00.00");

        assert_eq!(abs_time_to_ymdhms(59.994).unwrap().to_string(), "2000/01/01T12:00:59.99");
    }

    #[test]
    fn test_non_finite() {
        assert!(abs_time_to_ymdhms(f64::NAN).is_none());
        assert!(abs_time_to_ymdhms(f64::INFINITY).is_none());
    }
}
