//! Calendar clock shared between the date editor, the display and the sampler.
//!
//! The logger keeps its own wall clock with second resolution. It is advanced
//! once per second by a ticker task and may be rewritten field by field by an
//! external date editor. The sampler never reads individual fields: it takes a
//! whole-struct [`SharedClock::snapshot`] under a short-held lock, so a record
//! can never be stamped with a half-edited date.
//!
//! There is no leap-year handling: February always has 28 days.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Timelike};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::TimestampError;

/// Number of days in `month` (1-12). February is fixed at 28.
pub fn days_in_month(month: u8) -> u8 {
    match month {
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// A calendar date and time with second resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CalendarTimestamp {
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
}

impl CalendarTimestamp {
    /// Build a timestamp, validating every field.
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, TimestampError> {
        if !(1..=12).contains(&month) {
            return Err(TimestampError::Month(month));
        }
        if day == 0 || day > days_in_month(month) {
            return Err(TimestampError::Day { day, month });
        }
        if hour > 23 || minute > 59 || second > 59 {
            return Err(TimestampError::Time {
                hour,
                minute,
                second,
            });
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Parse `YYYY-MM-DD HH:MM:SS`.
    pub fn parse(text: &str) -> Result<Self, TimestampError> {
        let parsed = NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S")
            .map_err(|_| TimestampError::Parse(text.to_string()))?;
        Self::from_naive(parsed)
    }

    /// Convert from a chrono date-time. A 29th of February is clamped to the 28th.
    pub fn from_naive(value: NaiveDateTime) -> Result<Self, TimestampError> {
        let year = u16::try_from(value.year()).map_err(|_| TimestampError::Parse(value.to_string()))?;
        let month = value.month() as u8;
        let day = (value.day() as u8).min(days_in_month(month));
        Self::new(
            year,
            month,
            day,
            value.hour() as u8,
            value.minute() as u8,
            value.second() as u8,
        )
    }

    /// Current local time.
    pub fn now_local() -> Self {
        let now = chrono::Local::now().naive_local();
        Self::from_naive(now).unwrap_or_default()
    }

    /// Advance by one second, carrying into minute, hour, day, month and year.
    pub fn tick(&mut self) {
        if self.second < 59 {
            self.second += 1;
            return;
        }
        self.second = 0;
        if self.minute < 59 {
            self.minute += 1;
            return;
        }
        self.minute = 0;
        if self.hour < 23 {
            self.hour += 1;
            return;
        }
        self.hour = 0;
        if self.day < days_in_month(self.month) {
            self.day += 1;
            return;
        }
        self.day = 1;
        if self.month < 12 {
            self.month += 1;
            return;
        }
        self.month = 1;
        self.year = self.year.saturating_add(1);
    }

    /// Four-digit year.
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Month, 1-12.
    pub fn month(&self) -> u8 {
        self.month
    }

    /// Day of month.
    pub fn day(&self) -> u8 {
        self.day
    }

    /// Hour, 0-23.
    pub fn hour(&self) -> u8 {
        self.hour
    }

    /// Minute, 0-59.
    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// Second, 0-59.
    pub fn second(&self) -> u8 {
        self.second
    }

    // Field setters are unchecked; `SharedClock::update` validates the result.

    /// Set the year.
    pub fn set_year(&mut self, year: u16) {
        self.year = year;
    }

    /// Set the month.
    pub fn set_month(&mut self, month: u8) {
        self.month = month;
    }

    /// Set the day.
    pub fn set_day(&mut self, day: u8) {
        self.day = day;
    }

    /// Set the hour.
    pub fn set_hour(&mut self, hour: u8) {
        self.hour = hour;
    }

    /// Set the minute.
    pub fn set_minute(&mut self, minute: u8) {
        self.minute = minute;
    }

    /// Set the second.
    pub fn set_second(&mut self, second: u8) {
        self.second = second;
    }
}

impl Default for CalendarTimestamp {
    /// 2021-01-01 00:00:00, the firmware's power-on date.
    fn default() -> Self {
        Self {
            year: 2021,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
        }
    }
}

impl fmt::Display for CalendarTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// Which field the date editor is currently changing.
///
/// Advanced by a single external event (a button edge); `Minute` wraps back
/// to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum EditPart {
    /// Not editing.
    #[default]
    Idle,
    /// Editing the day.
    Day,
    /// Editing the month.
    Month,
    /// Editing the year.
    Year,
    /// Editing the hour.
    Hour,
    /// Editing the minute.
    Minute,
}

impl EditPart {
    /// Pure state transition for one button press.
    pub fn next(self) -> Self {
        match self {
            EditPart::Idle => EditPart::Day,
            EditPart::Day => EditPart::Month,
            EditPart::Month => EditPart::Year,
            EditPart::Year => EditPart::Hour,
            EditPart::Hour => EditPart::Minute,
            EditPart::Minute => EditPart::Idle,
        }
    }

    /// Whether a field is selected for editing.
    pub fn is_editing(self) -> bool {
        self != EditPart::Idle
    }
}

#[derive(Debug, Default)]
struct ClockState {
    now: CalendarTimestamp,
    editing: EditPart,
}

/// Process-wide calendar clock.
///
/// Cheap to clone; all clones refer to the same clock.
#[derive(Debug, Clone, Default)]
pub struct SharedClock {
    state: Arc<Mutex<ClockState>>,
}

impl SharedClock {
    /// Create a clock starting at `start`.
    pub fn new(start: CalendarTimestamp) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                now: start,
                editing: EditPart::Idle,
            })),
        }
    }

    /// Copy of the whole timestamp, taken atomically.
    pub fn snapshot(&self) -> CalendarTimestamp {
        self.state.lock().now
    }

    /// Advance one second unless the editor is active.
    ///
    /// Returns `true` if the clock moved.
    pub fn tick(&self) -> bool {
        let mut state = self.state.lock();
        if state.editing.is_editing() {
            return false;
        }
        state.now.tick();
        true
    }

    /// Rewrite fields in place. The closure works on a copy; the result is
    /// validated before it replaces the current value.
    pub fn update<F>(&self, edit: F) -> Result<CalendarTimestamp, TimestampError>
    where
        F: FnOnce(&mut CalendarTimestamp),
    {
        let mut state = self.state.lock();
        let mut candidate = state.now;
        edit(&mut candidate);
        let checked = CalendarTimestamp::new(
            candidate.year,
            candidate.month,
            candidate.day,
            candidate.hour,
            candidate.minute,
            candidate.second,
        )?;
        state.now = checked;
        Ok(checked)
    }

    /// Replace the timestamp wholesale.
    pub fn set(&self, value: CalendarTimestamp) {
        self.state.lock().now = value;
    }

    /// Field currently being edited.
    pub fn edit_part(&self) -> EditPart {
        self.state.lock().editing
    }

    /// Move the editor to the next field and return it.
    pub fn advance_edit(&self) -> EditPart {
        let mut state = self.state.lock();
        state.editing = state.editing.next();
        debug!(part = ?state.editing, "Date edit part advanced");
        state.editing
    }

    /// Tick once per `period` forever.
    pub async fn run_ticker(self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.tick();
        }
    }
}
