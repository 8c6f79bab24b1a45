//! Pomodoro timer model. The caller drives it with elapsed time.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PomodoroMode {
    #[default]
    Focus,
    ShortBreak,
    LongBreak,
}

impl PomodoroMode {
    pub const ALL: [PomodoroMode; 3] = [
        PomodoroMode::Focus,
        PomodoroMode::ShortBreak,
        PomodoroMode::LongBreak,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PomodoroMode::Focus => "Focus",
            PomodoroMode::ShortBreak => "Short Break",
            PomodoroMode::LongBreak => "Long Break",
        }
    }

    pub fn length(self) -> Duration {
        let minutes = match self {
            PomodoroMode::Focus => 25,
            PomodoroMode::ShortBreak => 5,
            PomodoroMode::LongBreak => 15,
        };
        Duration::from_secs(minutes * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pomodoro {
    mode: PomodoroMode,
    remaining: Duration,
    running: bool,
    sessions: u32,
}

impl Default for Pomodoro {
    fn default() -> Self {
        Self::new()
    }
}

impl Pomodoro {
    pub fn new() -> Self {
        Self {
            mode: PomodoroMode::Focus,
            remaining: PomodoroMode::Focus.length(),
            running: false,
            sessions: 0,
        }
    }

    pub fn mode(&self) -> PomodoroMode {
        self.mode
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Completed focus periods.
    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    /// Starts or pauses. A finished timer does not restart until reset.
    pub fn toggle(&mut self) {
        self.running = !self.running && !self.remaining.is_zero();
    }

    pub fn reset(&mut self) {
        self.running = false;
        self.remaining = self.mode.length();
    }

    pub fn switch_mode(&mut self, mode: PomodoroMode) {
        self.mode = mode;
        self.reset();
    }

    /// Counts down by `elapsed` while running. Returns true when this call finished the period.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        if !self.running {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(elapsed);
        if !self.remaining.is_zero() {
            return false;
        }
        self.running = false;
        if self.mode == PomodoroMode::Focus {
            self.sessions += 1;
        }
        true
    }

    /// Elapsed share of the period, 0 to 100.
    pub fn progress(&self) -> f64 {
        let total = self.mode.length().as_secs_f64();
        (total - self.remaining.as_secs_f64()) / total * 100.0
    }
}

/// `mm:ss` of the remaining time.
impl fmt::Display for Pomodoro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.remaining.as_secs();
        write!(f, "{:02}:{:02}", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn focus_period_counts_a_session() {
        let mut timer = Pomodoro::new();
        assert_eq!(timer.to_string(), "25:00");
        assert!(!timer.advance(Duration::from_secs(60)));

        timer.toggle();
        assert!(!timer.advance(Duration::from_secs(90)));
        assert_eq!(timer.to_string(), "23:30");
        assert!(timer.advance(Duration::from_secs(30 * 60)));
        assert_eq!(timer.sessions(), 1);
        assert!(!timer.is_running());
        assert!((timer.progress() - 100.0).abs() < f64::EPSILON);

        timer.toggle();
        assert!(!timer.is_running());
    }

    #[test]
    fn breaks_do_not_count_and_switching_resets() {
        let mut timer = Pomodoro::new();
        timer.switch_mode(PomodoroMode::ShortBreak);
        assert_eq!(timer.to_string(), "05:00");
        timer.toggle();
        assert!(timer.advance(Duration::from_secs(300)));
        assert_eq!(timer.sessions(), 0);

        timer.switch_mode(PomodoroMode::LongBreak);
        assert_eq!(timer.remaining(), Duration::from_secs(900));
        assert!(!timer.is_running());
        assert!(timer.progress().abs() < f64::EPSILON);
    }
}
