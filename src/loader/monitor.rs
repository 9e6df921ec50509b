//! Background reconciliation loop.
//!
//! Polls the capability tree on a fixed interval and reconciles the loaded
//! set whenever the tree's fingerprint changes. With the `file-watch` feature
//! a filesystem watcher also wakes the loop as soon as something changes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CapabilityLoader, TreeFingerprint};
use crate::capability::{CapabilityError, CapabilityResult};

/// Shortest poll interval and back-off the loop accepts.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Timing of the reconciliation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Delay before retrying after a failed tick.
    pub error_backoff: Duration,
    /// How long `stop` waits for the loop to exit.
    pub stop_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Stop,
    Changed,
}

/// Handle to the running reconciliation loop.
pub struct Monitor {
    stop_flag: Arc<AtomicBool>,
    signal_tx: Sender<Signal>,
    done_rx: Receiver<()>,
    handle: Option<JoinHandle<()>>,
    settings: MonitorSettings,
    #[cfg(feature = "file-watch")]
    _watcher: Option<notify::RecommendedWatcher>,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("running", &self.is_running())
            .field("settings", &self.settings)
            .finish()
    }
}

impl Monitor {
    /// Start monitoring the loader's capability root on a new thread.
    ///
    /// The current state of the tree is the baseline: only changes made after
    /// this call trigger a reconciliation.
    pub fn start(loader: Arc<CapabilityLoader>, settings: MonitorSettings) -> CapabilityResult<Self> {
        let baseline = TreeFingerprint::capture(loader.scanner()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not fingerprint capability root");
            TreeFingerprint::default()
        });

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (signal_tx, signal_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        #[cfg(feature = "file-watch")]
        let watcher = watch(loader.scanner().root(), signal_tx.clone());

        let flag = Arc::clone(&stop_flag);
        let handle = thread::Builder::new()
            .name("capability-monitor".to_string())
            .spawn(move || {
                run(&loader, &settings, &flag, &signal_rx, baseline);
                let _ = done_tx.send(());
            })
            .map_err(|e| CapabilityError::Monitor(format!("failed to spawn monitor: {e}")))?;

        tracing::info!(interval = ?settings.poll_interval, "Capability monitor started");

        Ok(Self {
            stop_flag,
            signal_tx,
            done_rx,
            handle: Some(handle),
            settings,
            #[cfg(feature = "file-watch")]
            _watcher: watcher,
        })
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the loop to run a tick now instead of waiting for the next poll.
    pub fn wake(&self) {
        let _ = self.signal_tx.send(Signal::Changed);
    }

    /// Stop the loop and wait for it to exit, up to the configured timeout.
    ///
    /// Returns whether the loop exited in time. Loaded capabilities are left
    /// as they are.
    pub fn stop(&mut self) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        self.stop_flag.store(true, Ordering::SeqCst);
        let _ = self.signal_tx.send(Signal::Stop);

        match self.done_rx.recv_timeout(self.settings.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                tracing::info!("Capability monitor stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout = ?self.settings.stop_timeout,
                    "Capability monitor did not stop in time, detaching"
                );
                false
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    loader: &CapabilityLoader,
    settings: &MonitorSettings,
    stop_flag: &AtomicBool,
    signals: &Receiver<Signal>,
    mut last: TreeFingerprint,
) {
    let poll_interval = settings.poll_interval.max(MIN_POLL_INTERVAL);
    let error_backoff = settings.error_backoff.max(MIN_POLL_INTERVAL);
    let mut wait = poll_interval;

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        match signals.recv_timeout(wait) {
            Ok(Signal::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Signal::Changed) | Err(RecvTimeoutError::Timeout) => {}
        }

        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        wait = match tick(loader, &mut last) {
            Ok(()) => poll_interval,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    retry_in = ?error_backoff,
                    "Capability monitor tick failed"
                );
                error_backoff
            }
        };
    }
}

/// One poll: reconcile if the tree changed since the last successful tick.
fn tick(loader: &CapabilityLoader, last: &mut TreeFingerprint) -> CapabilityResult<()> {
    let current = TreeFingerprint::capture(loader.scanner())?;
    if !current.changed_since(last) {
        return Ok(());
    }

    tracing::debug!("Capability tree changed, reconciling");
    let report = loader.reconcile()?;
    for name in &report.added {
        tracing::info!(capability = %name, "Hot-loaded capability");
    }
    for name in &report.removed {
        tracing::info!(capability = %name, "Hot-unloaded capability");
    }
    for (name, reason) in &report.failed {
        tracing::warn!(capability = %name, error = %reason, "Hot-load failed");
    }

    *last = current;
    Ok(())
}

#[cfg(feature = "file-watch")]
fn watch(root: &std::path::Path, signals: Sender<Signal>) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    if !root.is_dir() {
        return None;
    }

    let mut watcher = match notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        if event.is_ok() {
            let _ = signals.send(Signal::Changed);
        }
    }) {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(error = %e, "Filesystem watcher unavailable, polling only");
            return None;
        }
    };

    if let Err(e) = watcher.watch(root, RecursiveMode::Recursive) {
        tracing::warn!(root = %root.display(), error = %e, "Failed to watch capability root");
        return None;
    }

    tracing::debug!(root = %root.display(), "Watching capability root");
    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{BuiltinActivation, LoaderSettings};
    use crate::registry::{CapabilityRegistry, RegistrySettings};
    use crate::scanner::CapabilityScanner;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::TempDir;

    fn loader(temp: &TempDir) -> Arc<CapabilityLoader> {
        let registry =
            CapabilityRegistry::new(RegistrySettings::new(temp.path().join("reg"))).unwrap();
        Arc::new(CapabilityLoader::new(
            CapabilityScanner::new(temp.path().join("features")),
            registry,
            Arc::new(BuiltinActivation::new()),
            LoaderSettings::default(),
        ))
    }

    fn fast() -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
            stop_timeout: Duration::from_secs(2),
        }
    }

    fn wait_for(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn write_manifest(root: &Path, name: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("capability.json"),
            format!(r#"{{"name": "{name}", "description": "d", "agents_can_use": []}}"#),
        )
        .unwrap();
    }

    #[test]
    fn test_stop_is_prompt() {
        let temp = TempDir::new().unwrap();
        let mut monitor = Monitor::start(
            loader(&temp),
            MonitorSettings { poll_interval: Duration::from_secs(60), ..fast() },
        )
        .unwrap();

        assert!(monitor.is_running());
        let started = Instant::now();
        assert!(monitor.stop());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!monitor.is_running());
        assert!(monitor.stop());
    }

    #[test]
    fn test_hot_reload_round_trip() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("features");
        std::fs::create_dir_all(&root).unwrap();

        let loader = loader(&temp);
        loader.bootstrap().unwrap();
        let mut monitor = Monitor::start(Arc::clone(&loader), fast()).unwrap();

        write_manifest(&root, "late");
        assert!(wait_for(|| loader.is_loaded("late")));
        assert!(loader.with_registry(|r| r.is_registered("late")));

        std::fs::remove_dir_all(root.join("late")).unwrap();
        assert!(wait_for(|| !loader.is_loaded("late")));
        assert!(!loader.with_registry(|r| r.is_registered("late")));

        monitor.stop();
    }
}
