//! Cron expressions for `Schedule` triggers.
//!
//! Accepts the standard 5-field form (`min hour dom month dow`) as well as the
//! 6/7-field form with a leading seconds field. Times are UTC.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;

#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        let expression = expression.trim();
        let normalized = match expression.split_whitespace().count() {
            5 => format!("0 {expression}"),
            6 | 7 => expression.to_owned(),
            n => {
                return Err(ValidationError::InvalidTrigger(format!(
                    "cron expression '{expression}' has {n} fields, expected 5, 6 or 7"
                )))
            }
        };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            ValidationError::InvalidTrigger(format!("cron expression '{expression}': {e}"))
        })?;

        Ok(Self {
            expression: expression.to_owned(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}
