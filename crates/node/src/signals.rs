//! Shutdown signal watcher.
//!
//! The tiles run on plain threads, so SIGINT and SIGTERM are awaited on a
//! dedicated thread with a current-thread tokio runtime and surfaced as a
//! shared flag the launcher polls.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::signal;
use tracing::info;

const FLAG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Signal streams registered with a runtime.
///
/// Handlers are installed when this is built, so a signal raised after
/// [`ShutdownSignals::install`] returns is never lost.
struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: signal::unix::Signal,
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl ShutdownSignals {
    fn install(runtime: &Runtime) -> io::Result<Self> {
        let _guard = runtime.enter();
        Self::register()
    }

    #[cfg(unix)]
    fn register() -> io::Result<Self> {
        use signal::unix::SignalKind;
        Ok(Self {
            interrupt: signal::unix::signal(SignalKind::interrupt())?,
            terminate: signal::unix::signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn register() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Waits for a signal and records it in `shutdown`.
    ///
    /// Returns without a signal once `shutdown` is set by someone else, such
    /// as the launcher after a tile died.
    #[allow(unused_mut)]
    async fn wait(mut self, shutdown: Arc<AtomicBool>) {
        #[cfg(unix)]
        let ctrl_c = self.interrupt.recv();
        #[cfg(not(unix))]
        let ctrl_c = async {
            if signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = self.terminate.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let stopped_elsewhere = async {
            let mut tick = tokio::time::interval(FLAG_POLL_INTERVAL);
            while !shutdown.load(Ordering::Acquire) {
                tick.tick().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C"),
            _ = terminate => info!("Received SIGTERM"),
            _ = stopped_elsewhere => return,
        }
        shutdown.store(true, Ordering::Release);
    }
}

/// Installs SIGINT and SIGTERM handlers and spawns a thread that sets
/// `shutdown` once either arrives.
///
/// The handlers are in place when this returns.
pub fn spawn_signal_watcher(shutdown: Arc<AtomicBool>) -> io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let signals = ShutdownSignals::install(&runtime)?;
    thread::Builder::new()
        .name("signals".into())
        .spawn(move || runtime.block_on(signals.wait(shutdown)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[cfg(unix)]
    #[test]
    fn test_sigterm_sets_shutdown_flag() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let watcher = spawn_signal_watcher(Arc::clone(&shutdown)).unwrap();

        // SAFETY: the handler is already installed, so this only wakes the watcher.
        unsafe {
            libc::raise(libc::SIGTERM);
        }
        watcher.join().unwrap();
        assert!(shutdown.load(Ordering::Acquire));
    }

    #[test]
    fn test_watcher_exits_when_flag_set_elsewhere() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let watcher = spawn_signal_watcher(Arc::clone(&shutdown)).unwrap();
        shutdown.store(true, Ordering::Release);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !watcher.is_finished() {
            assert!(Instant::now() < deadline, "watcher never exited");
            thread::sleep(Duration::from_millis(10));
        }
        watcher.join().unwrap();
    }
}
