//! Wall-clock helpers for RTC chips and battery save timestamps

use std::time::SystemTime;

/// Read the time since the Unix epoch in nanoseconds. Returns 0 if the system-reported time is
/// somehow before the Unix epoch.
#[must_use]
pub fn current_time_nanos() -> u128 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_nanos()
}

/// Read the time since the Unix epoch in milliseconds, the unit `.rtc` battery files store.
#[must_use]
pub fn current_time_millis() -> u64 {
    (current_time_nanos() / 1_000_000) as u64
}

/// Determine the number of days in the given month+year.
///
/// February is assumed to be 29 days in every 4th year without the century rules, matching what
/// the RTC chips themselves do.
#[must_use]
pub fn days_in_month(month: u8, year: u8) -> u8 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if year % 4 == 0 {
                29
            } else {
                28
            }
        }
        _ => {
            log::error!("Invalid month: {month}, defaulting to 31 days in month");
            31
        }
    }
}

/// Determine the day of week for a date in the 2000s, with 0 = Sunday. Day and month both start
/// at 1, year is the RTC chip's own 0-99 year counter (2000-2099).
#[must_use]
pub fn day_of_week(day: u8, month: u8, year: u8) -> u8 {
    // Count days since 2000-01-01, which was a Saturday
    let mut days: u32 = 0;
    for y in 0..year {
        days += if y % 4 == 0 { 366 } else { 365 };
    }
    for m in 1..month {
        days += u32::from(days_in_month(m, year));
    }
    days += u32::from(day) - 1;

    ((days + 6) % 7) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn days_in_month_handles_rtc_leap_rule() {
        assert_eq!(days_in_month(2, 23), 28);
        assert_eq!(days_in_month(2, 24), 29);
        assert_eq!(days_in_month(9, 24), 30);
        assert_eq!(days_in_month(12, 24), 31);
    }

    #[test]
    fn day_of_week_known_dates() {
        // 2000-01-01 was a Saturday
        assert_eq!(day_of_week(1, 1, 0), 6);
        // 2024-07-04 was a Thursday
        assert_eq!(day_of_week(4, 7, 24), 4);
    }
}
