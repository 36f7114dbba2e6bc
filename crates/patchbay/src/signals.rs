//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM set the core's shutdown flag; the event loop notices
//! it between iterations (the interrupted poll wakes it early) and tears
//! down every backend before exiting.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::info;

static SHUTDOWN_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_signal: libc::c_int) {
    // async-signal-safe: one relaxed store, no allocation
    if let Some(flag) = SHUTDOWN_FLAG.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

/// Installs SIGINT and SIGTERM handlers that set `flag`.
pub fn install(flag: Arc<AtomicBool>) -> io::Result<()> {
    SHUTDOWN_FLAG
        .set(flag)
        .map_err(|_| io::Error::other("signal handlers already installed"))?;

    for signal in [libc::SIGINT, libc::SIGTERM] {
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_signal as libc::sighandler_t;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(signal, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }

    info!("📡 Signal handlers installed (SIGINT, SIGTERM)");
    Ok(())
}
