//! Schedule - 周期実行の cron 仕様
//!
//! フィールドを省略すると「毎回」(`*`) 扱いになります。
//! 空の仕様は「毎分実行」を意味します（意図的なデフォルト）。

use chrono::{DateTime, Utc};
use croner::Cron;
use serde::{Deserialize, Deserializer, Serialize};

/// Cron-style schedule with crontab field names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronSchedule {
    #[serde(default, deserialize_with = "cron_field")]
    pub minute: Option<String>,
    #[serde(default, deserialize_with = "cron_field")]
    pub hour: Option<String>,
    #[serde(default, deserialize_with = "cron_field")]
    pub day_of_month: Option<String>,
    #[serde(default, deserialize_with = "cron_field")]
    pub month_of_year: Option<String>,
    #[serde(default, deserialize_with = "cron_field")]
    pub day_of_week: Option<String>,
}

impl CronSchedule {
    /// Every minute.
    pub fn every_minute() -> Self {
        Self::default()
    }

    pub fn with_minute(mut self, minute: impl Into<String>) -> Self {
        self.minute = Some(minute.into());
        self
    }

    pub fn with_hour(mut self, hour: impl Into<String>) -> Self {
        self.hour = Some(hour.into());
        self
    }

    pub fn with_day_of_month(mut self, day: impl Into<String>) -> Self {
        self.day_of_month = Some(day.into());
        self
    }

    pub fn with_month_of_year(mut self, month: impl Into<String>) -> Self {
        self.month_of_year = Some(month.into());
        self
    }

    pub fn with_day_of_week(mut self, day: impl Into<String>) -> Self {
        self.day_of_week = Some(day.into());
        self
    }

    /// Five-field cron expression (`min hour dom month dow`).
    pub fn expression(&self) -> String {
        [
            &self.minute,
            &self.hour,
            &self.day_of_month,
            &self.month_of_year,
            &self.day_of_week,
        ]
        .iter()
        .map(|f| f.as_deref().unwrap_or("*"))
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// Parse the expression; fails on malformed fields.
    pub fn compile(&self) -> Result<Cron, ScheduleError> {
        let expression = self.expression();
        Cron::new(&expression)
            .parse()
            .map_err(|e| ScheduleError {
                expression,
                reason: e.to_string(),
            })
    }

    /// The first fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let cron = self.compile()?;
        cron.find_next_occurrence(&after, false)
            .map_err(|e| ScheduleError {
                expression: self.expression(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid schedule '{expression}': {reason}")]
pub struct ScheduleError {
    pub expression: String,
    pub reason: String,
}

/// crontab fields may be written as numbers (`"minute": 30`) or strings (`"*/15"`).
fn cron_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Field {
        Num(u64),
        Text(String),
    }

    Ok(Option::<Field>::deserialize(deserializer)?.map(|f| match f {
        Field::Num(n) => n.to_string(),
        Field::Text(s) => s,
    }))
}
