use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Stopped,
    Running,
    Expired,
}

impl TimerState {
    fn name(self) -> &'static str {
        match self {
            TimerState::Stopped => "stopped",
            TimerState::Running => "running",
            TimerState::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTick {
    /// Still counting down; the remaining seconds after this tick.
    Running(u32),
    /// This tick reached zero. Reported exactly once.
    Expired,
    /// The countdown is not running; the tick is a no-op.
    Spent,
}

/// Second-granularity countdown: Stopped → Running → Expired. This is a plain
/// decrementing counter driven by an external once-per-second tick, not a
/// wall-clock-anchored deadline; pausing is simply not ticking it.
#[derive(Debug, Clone)]
pub struct CountdownTimer {
    remaining: u32,
    total: u32,
    state: TimerState,
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self {
            remaining: 0,
            total: 0,
            state: TimerState::Stopped,
        }
    }

    pub fn start(&mut self, total_seconds: u32) -> Result<()> {
        if self.state != TimerState::Stopped {
            return Err(Error::InvalidTransition {
                phase: self.state.name(),
                action: "start the timer",
            });
        }
        if total_seconds == 0 {
            return Err(Error::InvalidDuration);
        }

        self.remaining = total_seconds;
        self.total = total_seconds;
        self.state = TimerState::Running;
        Ok(())
    }

    /// Restores an interrupted countdown: remaining picks up where the saved
    /// attempt left off while `total_seconds` keeps the original duration for
    /// display.
    pub fn restore(&mut self, remaining_seconds: u32, total_seconds: u32) -> Result<()> {
        if self.state != TimerState::Stopped {
            return Err(Error::InvalidTransition {
                phase: self.state.name(),
                action: "restore the timer",
            });
        }
        if remaining_seconds == 0 {
            return Err(Error::InvalidDuration);
        }

        self.remaining = remaining_seconds;
        self.total = total_seconds.max(remaining_seconds);
        self.state = TimerState::Running;
        Ok(())
    }

    pub fn tick(&mut self) -> TimerTick {
        if self.state != TimerState::Running {
            return TimerTick::Spent;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.state = TimerState::Expired;
            TimerTick::Expired
        } else {
            TimerTick::Running(self.remaining)
        }
    }

    /// Bonus time granted when resuming an interrupted attempt; raises both
    /// the remaining and the displayed total.
    pub fn extend(&mut self, extra_seconds: u32) -> Result<()> {
        if self.state != TimerState::Running {
            return Err(Error::InvalidTransition {
                phase: self.state.name(),
                action: "extend the timer",
            });
        }

        self.remaining += extra_seconds;
        self.total += extra_seconds;
        Ok(())
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }
}
