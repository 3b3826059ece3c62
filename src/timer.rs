/// Coarse periodic scheduling for the cooperative main loop.
///
/// Periods are measured on a wrapping millisecond counter. A late check
/// fires once and restarts the period from that moment; missed periods are
/// never replayed.

#[derive(Debug, Clone, Copy)]
pub struct IntervalTimer {
    period_ms: u32,
    last_ms: Option<u32>,
}

impl IntervalTimer {
    /// The first [`due`](Self::due) check fires immediately.
    pub const fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last_ms: None,
        }
    }

    /// The first check fires one full period after `now_ms`.
    pub const fn starting_at(period_ms: u32, now_ms: u32) -> Self {
        Self {
            period_ms,
            last_ms: Some(now_ms),
        }
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn due(&mut self, now_ms: u32) -> bool {
        match self.last_ms {
            Some(last) if now_ms.wrapping_sub(last) < self.period_ms => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }

    /// Milliseconds until the next firing, 0 if already due.
    pub fn remaining_ms(&self, now_ms: u32) -> u32 {
        match self.last_ms {
            Some(last) => self.period_ms.saturating_sub(now_ms.wrapping_sub(last)),
            None => 0,
        }
    }
}
