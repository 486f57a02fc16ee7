//! Ctrl-C / SIGTERM to interrupt flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

/// Spawns a listener that sets the returned flag on the first interrupt.
pub(crate) fn install_interrupt_handler() -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if wait_for_signal().await {
            warn!("interrupt received, finishing current work");
            interrupted_signal.store(true, Ordering::SeqCst);
        }
    });
    interrupted
}

/// Returns false if no handler could be installed.
#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            let ctrl_c = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            tokio::select! {
                () = ctrl_c => true,
                received = terminate.recv() => received.is_some(),
            }
        }
        Err(error) => {
            debug!(error = %error, "SIGTERM handler unavailable, listening for Ctrl-C only");
            tokio::signal::ctrl_c().await.is_ok()
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
