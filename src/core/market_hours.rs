use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use std::time::Duration;

/// Regular trading session of an exchange, in its local timezone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub timezone: Tz,
}

impl Default for MarketHours {
    fn default() -> Self {
        MarketHours {
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            timezone: chrono_tz::America::New_York,
        }
    }
}

impl MarketHours {
    /// Weekday and inside [open, close). Exchange holidays are not modelled.
    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }

    pub fn session_length(&self) -> Duration {
        (self.close - self.open).to_std().unwrap_or(Duration::ZERO)
    }

    /// Calendar date of the exchange at the given instant.
    pub fn session_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.timezone).date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_is_open_during_session() {
        let hours = MarketHours::default();
        // Monday 2025-03-03 10:00 EST == 15:00 UTC
        let monday_morning = Utc.with_ymd_and_hms(2025, 3, 3, 15, 0, 0).unwrap();
        assert!(hours.is_open(monday_morning));
    }

    #[test]
    fn test_is_closed_outside_session() {
        let hours = MarketHours::default();
        // 09:29 EST
        assert!(!hours.is_open(Utc.with_ymd_and_hms(2025, 3, 3, 14, 29, 0).unwrap()));
        // 16:00 EST, close is exclusive
        assert!(!hours.is_open(Utc.with_ymd_and_hms(2025, 3, 3, 21, 0, 0).unwrap()));
        // Saturday noon EST
        assert!(!hours.is_open(Utc.with_ymd_and_hms(2025, 3, 8, 17, 0, 0).unwrap()));
    }

    #[test]
    fn test_session_length() {
        assert_eq!(
            MarketHours::default().session_length(),
            Duration::from_secs(6 * 3600 + 30 * 60)
        );
    }

    #[test]
    fn test_session_date_uses_exchange_timezone() {
        let hours = MarketHours::default();
        // 02:00 UTC on the 4th is still the 3rd in New York
        let late = Utc.with_ymd_and_hms(2025, 3, 4, 2, 0, 0).unwrap();
        assert_eq!(
            hours.session_date(late),
            NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
        );
    }
}
