//! Cooperative interruption shared by the long-running loops.
//!
//! The binary owns an `Arc<AtomicBool>` that its signal handler sets; loops
//! poll it between units of work and while sleeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Granularity at which sleeping loops notice an interrupt.
const SLICE: Duration = Duration::from_millis(50);

/// True once an interrupt was requested.
#[must_use]
pub fn is_interrupted(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

/// Sleeps for `duration`, waking early if `flag` is set.
///
/// Returns `true` when the sleep was cut short by an interrupt.
pub async fn sleep_unless_interrupted(duration: Duration, flag: &AtomicBool) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if is_interrupted(flag) {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep((deadline - now).min(SLICE)).await;
    }
}
