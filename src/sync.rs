use portable_atomic::{AtomicBool, Ordering};

/// A flag, through which interrupt handlers ask the main loop to enter low power mode.
///
/// The sleep itself must never happen in an interrupt handler, since the CPU would resume inside
/// the handler and hold off all other interrupts of the same priority.
pub struct SleepRequest {
    requested: AtomicBool,
}
impl SleepRequest {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }
    pub fn is_pending(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}
impl Default for SleepRequest {
    fn default() -> Self {
        Self::new()
    }
}
