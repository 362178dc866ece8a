use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

/// Wall-clock timer for a named pipeline stage.
///
/// Start and stop are logged at `info` level so a request's stage costs can
/// be read straight off the server log.
pub struct Timer {
    name: String,
    tstamp: Option<DateTime<Utc>>,
    duration: Option<Duration>,
}

impl Timer {
    /// Create a stopped timer
    pub fn new(name: &str) -> Self {
        Timer {
            name: name.to_owned(),
            tstamp: None,
            duration: None,
        }
    }

    pub fn new_start(name: &str) -> Self {
        let mut t = Timer::new(name);
        t.start();
        t
    }

    pub fn start(&mut self) {
        info!("{}: starting", self.name);

        self.tstamp = Some(Utc::now());
        self.duration = None;
    }

    /// Stop the timer and return the elapsed milliseconds.
    pub fn stop(&mut self) -> i64 {
        match self.tstamp.take() {
            None => debug!("{}: not running!", self.name),
            Some(tstamp) => {
                let d = Utc::now() - tstamp;

                self.duration = Some(d);
                info!("{} duration: {} msec", self.name, d.num_milliseconds());
            }
        }

        self.duration_ms()
    }

    /// Duration of the last completed run in milliseconds, 0 if never stopped.
    pub fn duration_ms(&self) -> i64 {
        self.duration.map_or(0, |d| d.num_milliseconds())
    }

    pub fn is_running(&self) -> bool {
        self.tstamp.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::Timer;

    #[test]
    fn stopped_timer_reports_zero() {
        let mut t = Timer::new("idle");
        assert!(!t.is_running());
        assert_eq!(t.stop(), 0);
        assert_eq!(t.duration_ms(), 0);
    }

    #[test]
    fn restart_clears_previous_duration() {
        let mut t = Timer::new_start("stage");
        assert!(t.is_running());
        let elapsed = t.stop();
        assert!(elapsed >= 0);
        assert!(!t.is_running());

        t.start();
        assert_eq!(t.duration_ms(), 0);
    }
}
