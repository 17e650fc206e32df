//! Backpressure: pause above the high water mark, resume at or below the low water mark.

/// Hysteresis gate over a channel's buffered amount.
#[derive(Debug, Clone)]
pub struct FlowGate {
    high: usize,
    low: usize,
    paused: bool,
}

impl FlowGate {
    pub fn new(high: usize, low: usize) -> Self {
        Self {
            high,
            low,
            paused: false,
        }
    }

    /// Whether one more message may be sent. `None` means the transport has no
    /// buffered-amount signal, so the gate never closes.
    pub fn may_send(&mut self, buffered: Option<usize>) -> bool {
        let Some(buffered) = buffered else {
            return true;
        };
        if self.paused {
            if buffered > self.low {
                return false;
            }
            self.paused = false;
        }
        if buffered > self.high {
            self.paused = true;
            return false;
        }
        true
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signal_never_pauses() {
        let mut gate = FlowGate::new(10, 5);
        assert!(gate.may_send(None));
        assert!(!gate.is_paused());
    }

    #[test]
    fn pauses_above_high_and_resumes_at_low() {
        let mut gate = FlowGate::new(10, 5);
        assert!(gate.may_send(Some(10)));
        assert!(!gate.may_send(Some(11)));
        assert!(gate.is_paused());
        // Below high but above low: still paused.
        assert!(!gate.may_send(Some(8)));
        assert!(gate.may_send(Some(5)));
        assert!(!gate.is_paused());
    }
}
