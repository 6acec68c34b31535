//! Trading session calendar and clock
//!
//! A session is a named UTC hour window with a scoring weight. The calendar
//! is the single source of truth for every piece of session math: active
//! session detection, the session start used to bound candle fetches, and
//! the next boundary shown to users.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// One named session window over UTC hours.
///
/// `start_hour..end_hour` is half-open. Windows may wrap midnight
/// (`start_hour > end_hour`) and may overlap other windows; overlaps are
/// resolved by calendar order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWindow {
    pub name: String,
    pub start_hour: u32,
    pub end_hour: u32,
    pub weight: f64,
}

impl SessionWindow {
    pub fn new(name: impl Into<String>, start_hour: u32, end_hour: u32, weight: f64) -> Self {
        Self {
            name: name.into(),
            start_hour,
            end_hour,
            weight,
        }
    }

    fn contains_hour(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Wraps midnight.
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Priority-ordered set of session windows with a default fallback.
#[derive(Debug, Clone)]
pub struct SessionCalendar {
    windows: Vec<SessionWindow>,
    /// Index of the window returned when no window contains the instant.
    /// Should not happen with a gap-free calendar.
    default_index: usize,
}

impl SessionCalendar {
    /// Build a calendar from priority-ordered windows. The first window is
    /// the fallback default.
    pub fn new(windows: Vec<SessionWindow>) -> Self {
        assert!(!windows.is_empty(), "calendar requires at least one window");
        Self {
            windows,
            default_index: 0,
        }
    }

    /// The window active at `instant`: first match in calendar order.
    pub fn session_at(&self, instant: DateTime<Utc>) -> &SessionWindow {
        let hour = instant.hour();
        self.windows
            .iter()
            .find(|w| w.contains_hour(hour))
            .unwrap_or(&self.windows[self.default_index])
    }

    /// Start of the session window active at `instant`.
    pub fn session_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let window = self.session_at(instant);
        let midnight = instant
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        let start = midnight + Duration::hours(window.start_hour as i64);
        if start > instant {
            // Wrapped window whose start was yesterday.
            start - Duration::hours(24)
        } else {
            start
        }
    }

    /// End of the session window active at `instant`, i.e. the next session
    /// boundary. Derived from the same calendar as detection.
    pub fn next_boundary(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let window = self.session_at(instant);
        let midnight = instant
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        let end = midnight + Duration::hours(window.end_hour as i64);
        if end <= instant {
            end + Duration::hours(24)
        } else {
            end
        }
    }

    pub fn windows(&self) -> &[SessionWindow] {
        &self.windows
    }
}

impl Default for SessionCalendar {
    /// The stock crypto-futures calendar: Asian, London, New York.
    fn default() -> Self {
        Self::new(vec![
            SessionWindow::new("ASIAN", 0, 8, 0.7),
            SessionWindow::new("LONDON", 8, 16, 1.0),
            SessionWindow::new("NEW_YORK", 16, 24, 1.2),
        ])
    }
}

/// Wall-clock view over a calendar.
///
/// Pure function of the observation instant, so two polls at the same
/// instant always agree. That determinism is what makes session-transition
/// detection reliable.
#[derive(Debug, Clone)]
pub struct SessionClock {
    calendar: SessionCalendar,
}

impl SessionClock {
    pub fn new(calendar: SessionCalendar) -> Self {
        Self { calendar }
    }

    /// Name and weight of the session active now.
    pub fn current_session(&self) -> (String, f64) {
        let window = self.calendar.session_at(Utc::now());
        (window.name.clone(), window.weight)
    }

    pub fn calendar(&self) -> &SessionCalendar {
        &self.calendar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_default_calendar_detection() {
        let cal = SessionCalendar::default();
        assert_eq!(cal.session_at(at(0, 0)).name, "ASIAN");
        assert_eq!(cal.session_at(at(7, 59)).name, "ASIAN");
        assert_eq!(cal.session_at(at(8, 0)).name, "LONDON");
        assert_eq!(cal.session_at(at(15, 59)).name, "LONDON");
        assert_eq!(cal.session_at(at(16, 0)).name, "NEW_YORK");
        assert_eq!(cal.session_at(at(23, 59)).name, "NEW_YORK");
    }

    #[test]
    fn test_overlap_resolved_by_priority_order() {
        let cal = SessionCalendar::new(vec![
            SessionWindow::new("LONDON", 8, 16, 1.0),
            SessionWindow::new("NEW_YORK", 13, 22, 1.2),
            SessionWindow::new("ASIAN", 0, 8, 0.7),
        ]);
        // 13:00-16:00 is covered by both; LONDON wins by order.
        assert_eq!(cal.session_at(at(14, 0)).name, "LONDON");
        assert_eq!(cal.session_at(at(16, 30)).name, "NEW_YORK");
    }

    #[test]
    fn test_wrapping_window() {
        let cal = SessionCalendar::new(vec![
            SessionWindow::new("OVERNIGHT", 22, 6, 0.5),
            SessionWindow::new("DAY", 6, 22, 1.0),
        ]);
        assert_eq!(cal.session_at(at(23, 0)).name, "OVERNIGHT");
        assert_eq!(cal.session_at(at(3, 0)).name, "OVERNIGHT");
        assert_eq!(cal.session_at(at(12, 0)).name, "DAY");

        // Start of a wrapped window observed after midnight is yesterday.
        let start = cal.session_start(at(3, 0));
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 6, 14, 22, 0, 0).unwrap());
    }

    #[test]
    fn test_session_start_and_next_boundary_agree_with_detection() {
        let cal = SessionCalendar::default();
        let instant = at(10, 30);
        assert_eq!(
            cal.session_start(instant),
            Utc.with_ymd_and_hms(2025, 6, 15, 8, 0, 0).unwrap()
        );
        assert_eq!(
            cal.next_boundary(instant),
            Utc.with_ymd_and_hms(2025, 6, 15, 16, 0, 0).unwrap()
        );
        // The boundary is exactly where detection flips.
        let boundary = cal.next_boundary(instant);
        assert_ne!(
            cal.session_at(boundary).name,
            cal.session_at(instant).name
        );
    }
}
