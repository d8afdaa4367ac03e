//! Natural-language timestamps for prompt presentation

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};

/// Coarse part of the day, as a person would say it
fn day_period(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=13 => "noon",
        14..=17 => "afternoon",
        18..=21 => "evening",
        _ => "late night",
    }
}

/// Format a time like "Saturday, 17 October 2026, afternoon 14:05"
pub fn format_natural_time<Tz: TimeZone>(dt: &DateTime<Tz>) -> String {
    let local = dt.with_timezone(&Local);
    format!(
        "{}, {} {} {}, {} {:02}:{:02}",
        local.format("%A"),
        local.day(),
        local.format("%B"),
        local.year(),
        day_period(local.hour()),
        local.hour(),
        local.minute()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_periods() {
        assert_eq!(day_period(5), "morning");
        assert_eq!(day_period(12), "noon");
        assert_eq!(day_period(15), "afternoon");
        assert_eq!(day_period(21), "evening");
        assert_eq!(day_period(23), "late night");
        assert_eq!(day_period(3), "late night");
    }

    #[test]
    fn test_format() {
        let dt = Local.with_ymd_and_hms(2026, 10, 17, 14, 5, 0).unwrap();
        assert_eq!(
            format_natural_time(&dt),
            "Saturday, 17 October 2026, afternoon 14:05"
        );
    }
}
