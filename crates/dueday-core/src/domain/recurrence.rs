//! Frequency rules and their evaluation against local calendar dates.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::calendar::weekday_number;
use super::errors::CoreError;

const FRIDAY: u8 = 5;

/// When a recurring definition is due.
///
/// Weekday numbers run Sunday = 0 ... Saturday = 6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrequencyRule {
    /// Every day. Friday only when `include_friday` is set.
    ///
    /// Stored payloads call this flag `skip_friday`; despite the name, `false`
    /// leaves Friday out.
    Daily {
        #[serde(default, alias = "skip_friday")]
        include_friday: bool,
    },
    /// On an explicit, duplicate-free set of weekdays.
    Weekdays { days: Vec<u8> },
    /// On one day of the month. Months without that day are skipped.
    Monthly { day: u8 },
    /// On one (month, day) each year.
    Yearly { month: u8, day: u8 },
    /// Anything this build does not understand. Never due.
    #[serde(other)]
    Unknown,
}

impl FrequencyRule {
    /// Whether the rule fires on the local date of `at` in `tz`.
    pub fn is_due(&self, at: DateTime<Utc>, tz: &FixedOffset) -> bool {
        self.is_due_on(at.with_timezone(tz).date_naive())
    }

    /// Whether the rule fires on a local calendar date.
    pub fn is_due_on(&self, date: NaiveDate) -> bool {
        match self {
            FrequencyRule::Daily { include_friday } => {
                *include_friday || weekday_number(date) != FRIDAY
            }
            FrequencyRule::Weekdays { days } => days.contains(&weekday_number(date)),
            FrequencyRule::Monthly { day } => date.day() == u32::from(*day),
            FrequencyRule::Yearly { month, day } => {
                date.month() == u32::from(*month) && date.day() == u32::from(*day)
            }
            FrequencyRule::Unknown => false,
        }
    }

    /// Definition-time validation. Evaluation never calls this.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            FrequencyRule::Daily { .. } => Ok(()),
            FrequencyRule::Weekdays { days } => {
                if days.is_empty() {
                    return Err(invalid("weekday set is empty"));
                }
                if let Some(bad) = days.iter().find(|d| **d > 6) {
                    return Err(invalid(format!("weekday {bad} is outside 0..=6")));
                }
                let unique: BTreeSet<_> = days.iter().collect();
                if unique.len() != days.len() {
                    return Err(invalid("weekday set contains duplicates"));
                }
                Ok(())
            }
            FrequencyRule::Monthly { day } => {
                if (1..=31).contains(day) {
                    Ok(())
                } else {
                    Err(invalid(format!("day of month {day} is outside 1..=31")))
                }
            }
            FrequencyRule::Yearly { month, day } => {
                // 2024 is a leap year, so Feb 29 is accepted.
                match NaiveDate::from_ymd_opt(2024, u32::from(*month), u32::from(*day)) {
                    Some(_) => Ok(()),
                    None => Err(invalid(format!("{month:02}-{day:02} is not a calendar day"))),
                }
            }
            FrequencyRule::Unknown => Err(invalid("unknown rule kind")),
        }
    }

    /// Validated copy with the weekday set in ascending order, so two rules
    /// naming the same days compare equal.
    pub fn normalized(&self) -> Result<Self, CoreError> {
        self.validate()?;
        Ok(match self {
            FrequencyRule::Weekdays { days } => {
                let mut days = days.clone();
                days.sort_unstable();
                FrequencyRule::Weekdays { days }
            }
            other => other.clone(),
        })
    }
}

impl fmt::Display for FrequencyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
        match self {
            FrequencyRule::Daily { include_friday: true } => write!(f, "daily"),
            FrequencyRule::Daily { include_friday: false } => write!(f, "daily except Friday"),
            FrequencyRule::Weekdays { days } => {
                let names: Vec<&str> = days
                    .iter()
                    .filter_map(|d| NAMES.get(usize::from(*d)).copied())
                    .collect();
                write!(f, "weekly on {}", names.join(", "))
            }
            FrequencyRule::Monthly { day } => write!(f, "monthly on day {day}"),
            FrequencyRule::Yearly { month, day } => write!(f, "yearly on {month:02}-{day:02}"),
            FrequencyRule::Unknown => write!(f, "unknown rule"),
        }
    }
}

/// Pure evaluator entry point.
pub fn is_due(rule: &FrequencyRule, at: DateTime<Utc>, tz: &FixedOffset) -> bool {
    rule.is_due(at, tz)
}

fn invalid(msg: impl Into<String>) -> CoreError {
    CoreError::Validation(format!("malformed frequency rule: {}", msg.into()))
}
