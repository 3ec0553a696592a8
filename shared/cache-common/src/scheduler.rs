//! Cron-driven job ticker

use crate::{CacheError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// Sleeps until each upcoming tick of a cron expression and runs the job.
/// Ticks missed while a run was still in progress are skipped.
pub struct JobScheduler {
    name: String,
    schedule: Schedule,
}

impl JobScheduler {
    /// `expression` uses the six-field form with seconds (`0 */2 * * * *`)
    pub fn new(name: impl Into<String>, expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            CacheError::Configuration(format!("invalid cron '{}': {}", expression, e))
        })?;
        Ok(Self {
            name: name.into(),
            schedule,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn next_tick(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub async fn run_loop<F, Fut, E>(self, mut job: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        info!("Scheduler '{}' started", self.name);
        loop {
            let now = Utc::now();
            let Some(next) = self.next_tick(now) else {
                warn!("Scheduler '{}' has no upcoming ticks, stopping", self.name);
                return;
            };

            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            debug!("Scheduler '{}' next run at {} (in {:?})", self.name, next, wait);
            tokio::time::sleep(wait).await;

            if let Err(err) = job().await {
                warn!("Scheduled job '{}' failed: {}", self.name, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_tick_follows_expression() {
        let scheduler = JobScheduler::new("refresh", "0 */5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 1, 1, 12, 3, 10).unwrap();
        assert_eq!(
            scheduler.next_tick(after),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap())
        );
    }

    #[test]
    fn invalid_expression_is_configuration_error() {
        assert!(matches!(
            JobScheduler::new("refresh", "every five minutes"),
            Err(CacheError::Configuration(_))
        ));
    }
}
