//! `[ i/N]` progress lines for long fan-in loops.

use std::time::{Duration, Instant};

/// Minimum spacing between lines emitted by [`Progress::quiet`].
const QUIET_INTERVAL: Duration = Duration::from_secs(1);

/// Counts through `total` steps, logging one line per step.
#[derive(Debug)]
pub struct Progress {
    total: usize,
    current: usize,
    width: usize,
    last: Option<Instant>,
}

impl Progress {
    /// A counter over `total` steps.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            current: 0,
            width: total.to_string().len(),
            last: None,
        }
    }

    /// Steps taken so far.
    #[must_use]
    pub const fn current(&self) -> usize {
        self.current
    }

    fn prefix(&mut self, now: Instant) -> String {
        self.current += 1;
        self.last = Some(now);
        format!("[{:>width$}/{}]", self.current, self.total, width = self.width)
    }

    /// Advances and logs `message`. Returns the emitted line.
    pub fn step(&mut self, message: &str) -> String {
        let line = format!("{} {message}", self.prefix(Instant::now()));
        tracing::info!("{line}");
        line
    }

    /// Advances, logging `message` only if the previous line is at least a
    /// second old.
    pub fn quiet(&mut self, message: &str) -> Option<String> {
        self.quiet_at(message, Instant::now())
    }

    fn quiet_at(&mut self, message: &str, now: Instant) -> Option<String> {
        if self
            .last
            .is_some_and(|last| now.saturating_duration_since(last) < QUIET_INTERVAL)
        {
            self.current += 1;
            return None;
        }
        let line = format!("{} {message}", self.prefix(now));
        tracing::info!("{line}");
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_counter_to_total_width() {
        let mut progress = Progress::new(120);
        assert_eq!(progress.step("first"), "[  1/120] first");
        assert_eq!(progress.step("second"), "[  2/120] second");
    }

    #[test]
    fn quiet_skips_lines_within_interval_but_still_counts() {
        let mut progress = Progress::new(9);
        let start = Instant::now();
        assert_eq!(progress.quiet_at("a", start).as_deref(), Some("[1/9] a"));
        assert_eq!(progress.quiet_at("b", start + Duration::from_millis(10)), None);
        assert_eq!(
            progress
                .quiet_at("c", start + Duration::from_millis(1500))
                .as_deref(),
            Some("[3/9] c")
        );
        assert_eq!(progress.current(), 3);
    }
}
