use chrono::{DateTime, Days, FixedOffset, Months, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Unit that a trigger's `period` is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl PeriodUnit {
    /// Milliseconds per unit for the fixed-length units; `None` for calendar units.
    fn fixed_millis(self) -> Option<i64> {
        match self {
            PeriodUnit::Millisecond => Some(1),
            PeriodUnit::Second => Some(1_000),
            PeriodUnit::Minute => Some(60_000),
            PeriodUnit::Hour => Some(3_600_000),
            PeriodUnit::Day | PeriodUnit::Week | PeriodUnit::Month | PeriodUnit::Year => None,
        }
    }
}

impl std::fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PeriodUnit::Millisecond => "millisecond",
            PeriodUnit::Second => "second",
            PeriodUnit::Minute => "minute",
            PeriodUnit::Hour => "hour",
            PeriodUnit::Day => "day",
            PeriodUnit::Week => "week",
            PeriodUnit::Month => "month",
            PeriodUnit::Year => "year",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for PeriodUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let key = if lower == "ms" { "millisecond" } else { lower.trim_end_matches('s') };
        match key {
            "millisecond" => Ok(PeriodUnit::Millisecond),
            "second" => Ok(PeriodUnit::Second),
            "minute" => Ok(PeriodUnit::Minute),
            "hour" => Ok(PeriodUnit::Hour),
            "day" => Ok(PeriodUnit::Day),
            "week" => Ok(PeriodUnit::Week),
            "month" => Ok(PeriodUnit::Month),
            "year" => Ok(PeriodUnit::Year),
            other => Err(format!("unknown period unit: {other}")),
        }
    }
}

/// Recurrence description as submitted by a caller. It carries no cursor;
/// [`TriggerSpec::build`] validates it into a [`Trigger`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub start_time: DateTime<FixedOffset>,
    #[serde(default)]
    pub period: i64,
    pub period_unit: PeriodUnit,
    /// `-1` repeats indefinitely.
    #[serde(default)]
    pub repeat_count: i64,
    #[serde(default)]
    pub end_time: Option<DateTime<FixedOffset>>,
}

impl TriggerSpec {
    pub fn build(self) -> Result<Trigger, ValidationError> {
        Trigger::new(
            self.start_time,
            self.period,
            self.period_unit,
            self.repeat_count,
            self.end_time,
        )
    }
}

/// Immutable schedule plus the firing cursor.
///
/// The Nth fire time is `start_time + N * period` in `period_unit`. Day and
/// week units add calendar days; month and year units add calendar months,
/// clamping the day-of-month. All arithmetic happens in `start_time`'s own
/// UTC offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    start_time: DateTime<FixedOffset>,
    period: i64,
    period_unit: PeriodUnit,
    repeat_count: i64,
    end_time: Option<DateTime<FixedOffset>>,
    current_repeat_count: i64,
}

impl Trigger {
    pub fn new(
        start_time: DateTime<FixedOffset>,
        period: i64,
        period_unit: PeriodUnit,
        repeat_count: i64,
        end_time: Option<DateTime<FixedOffset>>,
    ) -> Result<Self, ValidationError> {
        let trigger = Self {
            start_time,
            period,
            period_unit,
            repeat_count,
            end_time,
            current_repeat_count: -1,
        };
        trigger.validate()?;
        Ok(trigger)
    }

    /// Check the schedule parameters. The job store re-checks on every load.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.period < 0 {
            return Err(ValidationError::NegativePeriod(self.period));
        }
        if self.repeat_count < -1 {
            return Err(ValidationError::RepeatCountOutOfRange(self.repeat_count));
        }
        if self.period == 0 && self.repeat_count != 0 {
            return Err(ValidationError::ZeroPeriodRepeats(self.repeat_count));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(ValidationError::EndBeforeStart {
                    start: self.start_time.to_rfc3339(),
                    end: end.to_rfc3339(),
                });
            }
        }
        Ok(())
    }

    pub fn start_time(&self) -> DateTime<FixedOffset> {
        self.start_time
    }

    pub fn period(&self) -> i64 {
        self.period
    }

    pub fn period_unit(&self) -> PeriodUnit {
        self.period_unit
    }

    pub fn repeat_count(&self) -> i64 {
        self.repeat_count
    }

    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        self.end_time
    }

    /// Index of the last produced fire time; `-1` before the first one.
    pub fn current_repeat_count(&self) -> i64 {
        self.current_repeat_count
    }

    /// The Nth candidate fire time, ignoring `repeat_count` and `end_time`.
    /// `None` if the result does not fit the calendar.
    pub fn fire_time_at(&self, n: i64) -> Option<DateTime<FixedOffset>> {
        if n < 0 {
            return None;
        }
        let steps = n.checked_mul(self.period)?;
        if let Some(unit_ms) = self.period_unit.fixed_millis() {
            let delta = TimeDelta::try_milliseconds(steps.checked_mul(unit_ms)?)?;
            return self.start_time.checked_add_signed(delta);
        }
        match self.period_unit {
            PeriodUnit::Day => {
                let days = u64::try_from(steps).ok()?;
                self.start_time.checked_add_days(Days::new(days))
            }
            PeriodUnit::Week => {
                let days = u64::try_from(steps.checked_mul(7)?).ok()?;
                self.start_time.checked_add_days(Days::new(days))
            }
            PeriodUnit::Month => {
                let months = u32::try_from(steps).ok()?;
                self.start_time.checked_add_months(Months::new(months))
            }
            PeriodUnit::Year => {
                let months = u32::try_from(steps.checked_mul(12)?).ok()?;
                self.start_time.checked_add_months(Months::new(months))
            }
            _ => None,
        }
    }

    fn next_candidate(&self) -> Option<(i64, DateTime<FixedOffset>)> {
        let n = self.current_repeat_count.checked_add(1)?;
        if self.repeat_count >= 0 && n > self.repeat_count {
            return None;
        }
        let candidate = self.fire_time_at(n)?;
        if matches!(self.end_time, Some(end) if candidate > end) {
            return None;
        }
        Some((n, candidate))
    }

    /// Whether another fire time remains. Does not move the cursor.
    pub fn has_next_fire_time(&self) -> bool {
        self.next_candidate().is_some()
    }

    /// Produce the next fire time and advance the cursor. Once exhausted this
    /// keeps returning `None` and leaves the cursor where it was.
    pub fn next_fire_time(&mut self) -> Option<DateTime<FixedOffset>> {
        let (n, candidate) = self.next_candidate()?;
        self.current_repeat_count = n;
        Some(candidate)
    }

    /// Up to `limit` upcoming fire times, computed on a copy. Also returns the
    /// cursor the copy ended on.
    pub fn preview(&self, limit: usize) -> (Vec<DateTime<FixedOffset>>, i64) {
        let mut probe = self.clone();
        let times = std::iter::from_fn(|| probe.next_fire_time())
            .take(limit)
            .collect();
        (times, probe.current_repeat_count)
    }
}
