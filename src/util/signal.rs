use portable_atomic::{AtomicBool, Ordering};

/// Wakes the driver task from an interrupt.
///
/// The network controller’s interrupt handler calls [`signal`](Self::signal)
/// and nothing else. The main loop calls [`take`](Self::take) and runs
/// [`Winc::task`](crate::Winc::task) when it returns true. Lives in a
/// `static`, since it is shared with the interrupt handler.
pub struct EventSignal {
    pending: AtomicBool,
}

impl EventSignal {
    pub const fn new() -> Self {
        EventSignal {
            pending: AtomicBool::new(false),
        }
    }

    pub fn signal(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Clears the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }
}

impl Default for EventSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SIGNAL: EventSignal = EventSignal::new();

    #[test]
    fn take_consumes_the_signal() {
        assert!(!SIGNAL.take());

        SIGNAL.signal();
        SIGNAL.signal();
        assert!(SIGNAL.is_pending());

        assert!(SIGNAL.take());
        assert!(!SIGNAL.take());
    }
}
