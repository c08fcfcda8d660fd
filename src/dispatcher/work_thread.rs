//! Worker threads: pluggable factory and activity tracking.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

// Layer 2: Third-party crate imports
use parking_lot::Mutex;
use serde::Serialize;

// Layer 3: Internal module imports
use crate::error::{Error, Result};

/// Whether work threads measure their working/waiting time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityTracking {
    /// Follow the environment-wide setting.
    #[default]
    Unspecified,
    On,
    Off,
}

impl ActivityTracking {
    pub(crate) fn resolve(self, environment_default: ActivityTracking) -> bool {
        match self {
            ActivityTracking::On => true,
            ActivityTracking::Off => false,
            ActivityTracking::Unspecified => matches!(environment_default, ActivityTracking::On),
        }
    }
}

/// Aggregated activity of one or more work threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivitySnapshot {
    /// Nanoseconds spent executing demands.
    pub working_ns: u64,
    /// Nanoseconds spent waiting for demands.
    pub waiting_ns: u64,
}

/// Shared activity counters of one work thread.
#[derive(Debug, Default)]
pub struct ActivityStats {
    enabled: bool,
    working_ns: AtomicU64,
    waiting_ns: AtomicU64,
}

impl ActivityStats {
    pub(crate) fn new(enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled,
            working_ns: AtomicU64::new(0),
            waiting_ns: AtomicU64::new(0),
        })
    }

    pub(crate) fn track_working<T>(&self, body: impl FnOnce() -> T) -> T {
        self.track(&self.working_ns, body)
    }

    pub(crate) fn track_waiting<T>(&self, body: impl FnOnce() -> T) -> T {
        self.track(&self.waiting_ns, body)
    }

    fn track<T>(&self, counter: &AtomicU64, body: impl FnOnce() -> T) -> T {
        if !self.enabled {
            return body();
        }
        let started = Instant::now();
        let value = body();
        let elapsed = started.elapsed().as_nanos() as u64;
        counter.fetch_add(elapsed, Ordering::Relaxed);
        value
    }

    pub(crate) fn snapshot(&self) -> Option<ActivitySnapshot> {
        if !self.enabled {
            return None;
        }
        Some(ActivitySnapshot {
            working_ns: self.working_ns.load(Ordering::Relaxed),
            waiting_ns: self.waiting_ns.load(Ordering::Relaxed),
        })
    }
}

/// Factory of dispatcher worker threads.
///
/// The default spawns named `std::thread`s; custom factories can pin
/// affinity, adjust stack sizes, and so on.
pub trait WorkThreadFactory: Send + Sync + 'static {
    /// Spawn a worker running `body`.
    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send>,
    ) -> std::io::Result<JoinHandle<()>>;
}

/// Default factory: named OS threads.
#[derive(Debug, Default)]
pub struct StdWorkThreadFactory;

impl WorkThreadFactory for StdWorkThreadFactory {
    fn spawn(
        &self,
        name: String,
        body: Box<dyn FnOnce() + Send>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(body)
    }
}

/// One dispatcher worker with join bookkeeping.
pub(crate) struct WorkThread {
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: Arc<Mutex<Option<ThreadId>>>,
    activity: Arc<ActivityStats>,
}

impl WorkThread {
    /// Spawn a worker. The spawned body records its thread id before
    /// running `body`, so self-join detection is race-free.
    pub(crate) fn spawn(
        factory: &dyn WorkThreadFactory,
        name: String,
        activity: Arc<ActivityStats>,
        body: impl FnOnce(Arc<ActivityStats>) + Send + 'static,
    ) -> Result<Self> {
        let thread_id: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
        let id_slot = Arc::clone(&thread_id);
        let body_activity = Arc::clone(&activity);
        let handle = factory
            .spawn(
                name,
                Box::new(move || {
                    *id_slot.lock() = Some(std::thread::current().id());
                    body(body_activity);
                }),
            )
            .map_err(|_| Error::DispatcherCreationFailed)?;
        Ok(Self {
            handle: Mutex::new(Some(handle)),
            thread_id,
            activity,
        })
    }

    /// Join the worker. Fails when called from the worker itself.
    pub(crate) fn join(&self) -> Result<()> {
        if *self.thread_id.lock() == Some(std::thread::current().id()) {
            return Err(Error::UnableToJoinThreadByItself);
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        Ok(())
    }

    pub(crate) fn activity(&self) -> &Arc<ActivityStats> {
        &self.activity
    }
}

#[cfg(test)]
#[allow(clippy::panic)] // Tests are allowed to panic on violated expectations
mod tests {
    use super::*;

    #[test]
    fn test_std_factory_spawns_and_joins() {
        let thread = WorkThread::spawn(
            &StdWorkThreadFactory,
            "test-worker".to_string(),
            ActivityStats::new(false),
            |_| {},
        );
        let thread = match thread {
            Ok(t) => t,
            Err(e) => panic!("spawn must succeed: {e}"),
        };
        assert!(thread.join().is_ok());
        // Joining twice is a no-op.
        assert!(thread.join().is_ok());
    }

    #[test]
    fn test_activity_tracking_resolution() {
        assert!(ActivityTracking::On.resolve(ActivityTracking::Off));
        assert!(!ActivityTracking::Off.resolve(ActivityTracking::On));
        assert!(ActivityTracking::Unspecified.resolve(ActivityTracking::On));
        assert!(!ActivityTracking::Unspecified.resolve(ActivityTracking::Off));
        assert!(!ActivityTracking::Unspecified.resolve(ActivityTracking::Unspecified));
    }

    #[test]
    fn test_activity_stats_accumulate() {
        let stats = ActivityStats::new(true);
        stats.track_working(|| std::thread::sleep(std::time::Duration::from_millis(5)));
        stats.track_waiting(|| std::thread::sleep(std::time::Duration::from_millis(2)));

        let snapshot = match stats.snapshot() {
            Some(s) => s,
            None => panic!("tracking is enabled"),
        };
        assert!(snapshot.working_ns > 0);
        assert!(snapshot.waiting_ns > 0);
    }

    #[test]
    fn test_disabled_stats_report_nothing() {
        let stats = ActivityStats::new(false);
        stats.track_working(|| {});
        assert!(stats.snapshot().is_none());
    }
}
