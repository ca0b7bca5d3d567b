use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::RestoreState;

static HELD: AtomicBool = AtomicBool::new(false);

/// Elevated-priority window for adapter channel acquisition.
///
/// Masks interrupts (through `critical-section`) for as long as the guard
/// lives. The window is strictly paired and not re-entrant: creating a
/// second guard while one is held panics. Nothing that blocks may run
/// inside it.
pub struct PriorityGuard {
    restore: RestoreState,
}

impl PriorityGuard {
    /// Enter the window.
    ///
    /// # Panics
    ///
    /// If the window is already held.
    pub fn new() -> Self {
        // Safety: the matching release happens in `Drop`, or right below
        // on the panic path.
        let restore = unsafe { critical_section::acquire() };
        if HELD.swap(true, Ordering::Acquire) {
            // Safety: releases the acquire above; the outer guard is untouched.
            unsafe { critical_section::release(restore) };
            panic!("priority window re-entered");
        }
        Self { restore }
    }

    /// Whether a guard is currently alive.
    pub fn is_held() -> bool {
        HELD.load(Ordering::Acquire)
    }
}

impl Default for PriorityGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        HELD.store(false, Ordering::Release);
        // Safety: pairs with the acquire in `new`.
        unsafe { critical_section::release(self.restore) };
    }
}
