use std::fmt;

use chrono::{DateTime, Utc};

use treetrade_types::models::Listing;

const MS_PER_MINUTE: i64 = 60_000;
const MS_PER_HOUR: i64 = 3_600_000;

/// Time left before a listing expires, clamped at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingTime {
    pub hours: i64,
    pub minutes: i64,
}

impl RemainingTime {
    pub fn is_zero(&self) -> bool {
        self.hours == 0 && self.minutes == 0
    }
}

impl fmt::Display for RemainingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h {}m", self.hours, self.minutes)
    }
}

pub fn remaining_time(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> RemainingTime {
    let delta_ms = (expires_at - now).num_milliseconds();
    if delta_ms <= 0 {
        return RemainingTime { hours: 0, minutes: 0 };
    }

    RemainingTime {
        hours: delta_ms.div_euclid(MS_PER_HOUR),
        minutes: delta_ms.div_euclid(MS_PER_MINUTE).rem_euclid(60),
    }
}

/// Same label on the card and the detail view.
pub fn listing_remaining(listing: &Listing, now: DateTime<Utc>) -> RemainingTime {
    remaining_time(listing.expires_at, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn splits_hours_and_minutes() {
        let now = Utc::now();
        let left = remaining_time(now + Duration::minutes(23 * 60 + 59) + Duration::seconds(30), now);
        assert_eq!(left, RemainingTime { hours: 23, minutes: 59 });
        assert_eq!(left.to_string(), "23h 59m");
    }

    #[test]
    fn rounds_down() {
        let now = Utc::now();
        let left = remaining_time(now + Duration::seconds(59), now);
        assert_eq!(left, RemainingTime { hours: 0, minutes: 0 });
        let left = remaining_time(now + Duration::minutes(61), now);
        assert_eq!(left, RemainingTime { hours: 1, minutes: 1 });
    }

    #[test]
    fn clamps_once_expired() {
        let now = Utc::now();
        assert!(remaining_time(now, now).is_zero());
        let left = remaining_time(now - Duration::hours(5), now);
        assert_eq!(left.to_string(), "0h 0m");
    }

    #[test]
    fn minutes_stay_in_range() {
        let now = Utc::now();
        for offset in (-600..6000).step_by(7) {
            let left = remaining_time(now + Duration::minutes(offset), now);
            assert!(left.hours >= 0);
            assert!((0..60).contains(&left.minutes));
        }
    }
}
