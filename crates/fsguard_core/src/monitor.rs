//! Fixed-interval background tasks with prompt shutdown.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to a running background monitor.
///
/// Stopping (or dropping) the handle wakes the monitor thread immediately
/// and joins it; a task run in progress finishes first.
pub struct MonitorHandle {
    name: String,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Name given at spawn time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true while the monitor thread is running.
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Stops the monitor and waits for its thread to exit.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(monitor = %self.name, "Monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Runs `task` every `interval` on a named thread until stopped.
///
/// The first run happens after one full interval.
pub fn spawn_monitor<F>(name: &str, interval: Duration, mut task: F) -> std::io::Result<MonitorHandle>
where
    F: FnMut() + Send + 'static,
{
    let (stop_tx, stop_rx) = channel::<()>();
    let thread_name = format!("fsguard-{}", name);
    let monitor_name = name.to_string();

    let thread = std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    debug!(monitor = %monitor_name, "Monitor tick");
                    task();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!(monitor = %monitor_name, "Monitor stopping");
                    break;
                }
            }
        })?;

    Ok(MonitorHandle {
        name: name.to_string(),
        stop_tx: Some(stop_tx),
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_monitor_runs_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut handle = spawn_monitor("test", Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        assert!(count.load(Ordering::SeqCst) >= 2);
        assert!(!handle.is_running());
    }

    #[test]
    fn test_stop_is_prompt() {
        let mut handle = spawn_monitor("slow", Duration::from_secs(3600), || {}).unwrap();
        let start = Instant::now();
        handle.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
