use chrono::{DateTime, Utc};

use crate::db::models::{Event, LifecycleState};

/// Classify an interval relative to `now`.
///
/// Both bounds are inclusive for `Active`: an event whose start equals `now`
/// has begun, and one whose end equals `now` has not yet finished.
pub fn classify(now: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> LifecycleState {
    if start > now {
        LifecycleState::Upcoming
    } else if end < now {
        LifecycleState::Past
    } else {
        LifecycleState::Active
    }
}

/// Recompute the derived lifecycle state of every event in place.
pub fn reclassify_all(events: &mut [Event], now: DateTime<Utc>) {
    for event in events.iter_mut() {
        event.lifecycle_state = classify(now, event.start, event.end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn classifies_each_side_of_the_interval() {
        assert_eq!(classify(at(8), at(9), at(17)), LifecycleState::Upcoming);
        assert_eq!(classify(at(12), at(9), at(17)), LifecycleState::Active);
        assert_eq!(classify(at(18), at(9), at(17)), LifecycleState::Past);
    }

    #[test]
    fn bounds_are_active() {
        assert_eq!(classify(at(9), at(9), at(17)), LifecycleState::Active);
        assert_eq!(classify(at(17), at(9), at(17)), LifecycleState::Active);
    }

    #[test]
    fn classification_is_stable_across_calls() {
        let start = at(9);
        for offset in [-600i64, -1, 0, 1, 480, 481, 10_000] {
            let now = start + Duration::minutes(offset);
            let first = classify(now, start, at(17));
            let second = classify(now, start, at(17));
            assert_eq!(first, second);
        }
    }

    #[test]
    fn inverted_interval_is_never_active_outside_its_bounds() {
        // end before start: start wins when it is in the future
        assert_eq!(classify(at(8), at(10), at(9)), LifecycleState::Upcoming);
        assert_eq!(classify(at(11), at(10), at(9)), LifecycleState::Past);
    }
}
