use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Demo configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// How many increments each phase dispatches.
    pub steps: u32,
    /// Suspension inside the async reducer.
    pub delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let steps = env::var("STARUX_DEMO_STEPS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .context("STARUX_DEMO_STEPS must be a non-negative integer")?;
        let delay_ms: u64 = env::var("STARUX_DEMO_DELAY_MS")
            .unwrap_or_else(|_| "25".to_string())
            .parse()
            .context("STARUX_DEMO_DELAY_MS must be a number of milliseconds")?;

        Ok(Self {
            steps,
            delay: Duration::from_millis(delay_ms),
        })
    }

    pub fn log(&self) {
        info!(steps = self.steps, delay_ms = self.delay.as_millis() as u64, "Config loaded");
    }
}
