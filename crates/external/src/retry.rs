use std::{fmt::Display, thread, time::Duration};

/// Re-runs a fallible closure, sleeping `interval` milliseconds between tries.
///
/// `attempts` counts the retries after the first call.
#[derive(SmartDefault)]
pub struct Retry {
    #[default = 3]
    attempts: u64,
    #[default = 1000]
    interval: u64,
}

impl Retry {
    pub fn attempts(mut self, attempts: u64) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    pub fn retry_until_ok<F, T, E>(&self, mut func: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Display,
    {
        let pause = Duration::from_millis(self.interval);
        for attempt in 1..=self.attempts {
            match func() {
                Ok(value) => return Ok(value),
                Err(why) => {
                    debug!("attempt {} of {} failed: {}", attempt, self.attempts + 1, why);
                    thread::sleep(pause);
                }
            }
        }

        func()
    }
}
