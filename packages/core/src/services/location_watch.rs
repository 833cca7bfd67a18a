//! Location watcher
//!
//! Fans position updates out to any number of subscribers. The platform
//! side (whatever produces fixes) calls [`LocationWatcher::publish_location`]
//! and [`LocationWatcher::publish_error`]; screens subscribe with
//! [`LocationWatcher::start`] or ask once with [`LocationWatcher::get`].
//!
//! Subscribers live in a [`ThreadSafeList`], so they can be added and
//! removed from any thread, including from inside their own callback.
//! Notification walks a snapshot of the list taken without holding its lock.

use crate::utils::{lock, NodeHandle, ThreadSafeList};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;

/// A position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// Failure reported by the position source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Unable to determine location")]
    Undetermined,

    #[error("Location permission denied")]
    Denied,

    #[error("Location source failed: {0}")]
    Unknown(String),
}

pub type LocationCallback = Arc<dyn Fn(Result<Location, LocationError>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Started,
    Paused,
    Stopped,
}

struct Watcher {
    callback: LocationCallback,
    continuous: bool,
    state: Mutex<WatchState>,
    handle: Mutex<Option<NodeHandle>>,
}

struct WatchShared {
    watchers: ThreadSafeList<Arc<Watcher>>,
    // Held while joining or leaving, so membership and `updating` agree
    membership: Mutex<()>,
    current: Mutex<Option<Location>>,
    updating: AtomicBool,
    error_mode: AtomicBool,
}

impl WatchShared {
    fn join(&self, watcher: &Arc<Watcher>) {
        let _membership = lock(&self.membership);
        let mut handle = lock(&watcher.handle);
        *handle = Some(self.watchers.add_to_tail(watcher.clone()));
        self.updating.store(true, Ordering::SeqCst);
    }

    /// Stop `watcher`; `false` if it was already stopped
    fn stop(&self, watcher: &Watcher) -> bool {
        {
            let mut state = lock(&watcher.state);
            if *state == WatchState::Stopped {
                return false;
            }
            *state = WatchState::Stopped;
        }

        let _membership = lock(&self.membership);
        if let Some(handle) = lock(&watcher.handle).take() {
            self.watchers.remove(handle);
        }
        if self.watchers.is_empty() {
            self.updating.store(false, Ordering::SeqCst);
            // A stale fix must not be handed to the next subscriber
            *lock(&self.current) = None;
            tracing::debug!("Last location watcher stopped, updates off");
        }
        true
    }

    fn notify(&self, result: Result<Location, LocationError>) {
        for watcher in self.watchers.convert_to_array() {
            if *lock(&watcher.state) != WatchState::Started {
                continue;
            }
            // A one-shot is answered by whoever stops it
            if !watcher.continuous && result.is_ok() && !self.stop(&watcher) {
                continue;
            }
            (watcher.callback)(result.clone());
        }
    }
}

/// Subscription returned by [`LocationWatcher::start`]
#[derive(Clone)]
pub struct WatchContext {
    watcher: Arc<Watcher>,
    shared: Weak<WatchShared>,
}

impl WatchContext {
    pub fn state(&self) -> WatchState {
        *lock(&self.watcher.state)
    }

    pub fn is_started(&self) -> bool {
        self.state() == WatchState::Started
    }

    pub fn is_paused(&self) -> bool {
        self.state() == WatchState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == WatchState::Stopped
    }

    /// Stop delivering updates without unsubscribing
    pub fn pause(&self) {
        let mut state = lock(&self.watcher.state);
        if *state == WatchState::Started {
            *state = WatchState::Paused;
        }
    }

    /// Resume delivery; the last known fix, if any, is delivered right away
    pub fn resume(&self) {
        {
            let mut state = lock(&self.watcher.state);
            if *state != WatchState::Paused {
                return;
            }
            *state = WatchState::Started;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.updating.store(true, Ordering::SeqCst);
            let current = *lock(&shared.current);
            if let Some(location) = current {
                deliver_later(self.watcher.callback.clone(), location);
            }
        }
    }

    /// Unsubscribe; idempotent
    pub fn stop(&self) {
        match self.shared.upgrade() {
            Some(shared) => {
                shared.stop(&self.watcher);
            }
            None => *lock(&self.watcher.state) = WatchState::Stopped,
        }
    }
}

fn deliver_later(callback: LocationCallback, location: Location) {
    tokio::spawn(async move { callback(Ok(location)) });
}

/// Location fan-out service
///
/// # Examples
///
/// ```rust
/// use storykeep_core::services::{Location, LocationWatcher};
/// use std::sync::{Arc, Mutex};
///
/// let watcher = LocationWatcher::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let context = watcher.start(false, move |fix| sink.lock().unwrap().push(fix));
///
/// watcher.publish_location(Location::new(49.28, -123.12));
/// context.stop();
/// assert_eq!(seen.lock().unwrap().len(), 1);
/// ```
#[derive(Clone)]
pub struct LocationWatcher {
    shared: Arc<WatchShared>,
}

impl LocationWatcher {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(WatchShared {
                watchers: ThreadSafeList::new(),
                membership: Mutex::new(()),
                current: Mutex::new(None),
                updating: AtomicBool::new(false),
                error_mode: AtomicBool::new(false),
            }),
        }
    }

    fn subscribe(&self, continuous: bool, state: WatchState, callback: LocationCallback) -> WatchContext {
        let watcher = Arc::new(Watcher {
            callback,
            continuous,
            state: Mutex::new(state),
            handle: Mutex::new(None),
        });
        self.shared.join(&watcher);

        WatchContext {
            watcher,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Subscribe to every update until stopped
    ///
    /// With `paused` the subscription starts paused. Otherwise the last
    /// known fix, if any, is delivered asynchronously on the tokio runtime.
    pub fn start<F>(&self, paused: bool, callback: F) -> WatchContext
    where
        F: Fn(Result<Location, LocationError>) + Send + Sync + 'static,
    {
        let state = if paused {
            WatchState::Paused
        } else {
            WatchState::Started
        };
        let context = self.subscribe(true, state, Arc::new(callback));

        if !paused {
            if let Some(location) = self.current_location() {
                deliver_later(context.watcher.callback.clone(), location);
            }
        }
        context
    }

    /// Ask for a single fix
    ///
    /// Answered from the last known fix when there is one, otherwise by the
    /// next published fix. Errors are delivered until a fix arrives.
    pub fn get<F>(&self, callback: F)
    where
        F: Fn(Result<Location, LocationError>) + Send + Sync + 'static,
    {
        if let Some(location) = self.current_location() {
            deliver_later(Arc::new(callback), location);
            return;
        }

        let context = self.subscribe(false, WatchState::Started, Arc::new(callback));
        // A fix published while subscribing reached no one
        if let Some(location) = self.current_location() {
            if self.shared.stop(&context.watcher) {
                deliver_later(context.watcher.callback.clone(), location);
            }
        }
    }

    /// Deliver a new fix to every started watcher
    pub fn publish_location(&self, location: Location) {
        self.shared.error_mode.store(false, Ordering::SeqCst);
        *lock(&self.shared.current) = Some(location);
        self.shared.notify(Ok(location));
    }

    /// Deliver a source failure
    ///
    /// Repeated failures without a fix in between are reported once.
    pub fn publish_error(&self, error: LocationError) {
        if self.shared.error_mode.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("Location source failed: {}", error);
        if error == LocationError::Denied {
            *lock(&self.shared.current) = None;
        }
        self.shared.notify(Err(error));
    }

    pub fn current_location(&self) -> Option<Location> {
        *lock(&self.shared.current)
    }

    /// Whether any subscriber wants updates
    pub fn is_updating(&self) -> bool {
        self.shared.updating.load(Ordering::SeqCst)
    }

    pub fn watcher_count(&self) -> usize {
        self.shared.watchers.len()
    }
}

impl Default for LocationWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn recorder() -> (
        Arc<Mutex<Vec<Result<Location, LocationError>>>>,
        impl Fn(Result<Location, LocationError>) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |fix: Result<Location, LocationError>| {
            sink.lock().unwrap().push(fix)
        })
    }

    #[test]
    fn test_one_shot_stops_after_first_fix() {
        let watcher = LocationWatcher::new();
        let (seen, callback) = recorder();
        watcher.get(callback);
        assert_eq!(watcher.watcher_count(), 1);

        watcher.publish_location(Location::new(1.0, 2.0));
        watcher.publish_location(Location::new(3.0, 4.0));

        assert_eq!(*seen.lock().unwrap(), vec![Ok(Location::new(1.0, 2.0))]);
        assert_eq!(watcher.watcher_count(), 0);
        assert!(!watcher.is_updating());
    }

    #[test]
    fn test_paused_watchers_are_skipped() {
        let watcher = LocationWatcher::new();
        let (seen, callback) = recorder();
        let context = watcher.start(true, callback);

        watcher.publish_location(Location::new(1.0, 1.0));
        assert!(seen.lock().unwrap().is_empty());
        assert!(context.is_paused());

        context.pause();
        context.stop();
        context.stop();
        assert!(context.is_stopped());
        assert_eq!(watcher.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_resume_delivers_last_fix() {
        let watcher = LocationWatcher::new();
        let keep_alive = watcher.start(false, |_| {});
        watcher.publish_location(Location::new(5.0, 6.0));

        let (seen, callback) = recorder();
        let context = watcher.start(true, callback);
        context.resume();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*seen.lock().unwrap(), vec![Ok(Location::new(5.0, 6.0))]);
        context.stop();
        keep_alive.stop();
        assert_eq!(watcher.current_location(), None);
    }

    #[test]
    fn test_errors_reported_once_until_next_fix() {
        let watcher = LocationWatcher::new();
        let (seen, callback) = recorder();
        let context = watcher.start(false, callback);

        watcher.publish_error(LocationError::Undetermined);
        watcher.publish_error(LocationError::Undetermined);
        watcher.publish_location(Location::new(0.0, 0.0));
        watcher.publish_error(LocationError::Denied);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Err(LocationError::Undetermined),
                Ok(Location::new(0.0, 0.0)),
                Err(LocationError::Denied),
            ]
        );
        assert_eq!(watcher.current_location(), None);
        context.stop();
    }

    #[test]
    fn test_callback_may_stop_its_own_subscription() {
        let watcher = LocationWatcher::new();
        let slot: Arc<Mutex<Option<WatchContext>>> = Arc::new(Mutex::new(None));
        let own = slot.clone();
        let context = watcher.start(false, move |_| {
            if let Some(context) = own.lock().unwrap().take() {
                context.stop();
            }
        });
        *slot.lock().unwrap() = Some(context.clone());

        watcher.publish_location(Location::new(1.0, 1.0));
        assert!(context.is_stopped());
        assert_eq!(watcher.watcher_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_one_shots_are_each_answered_once() {
        const REQUESTERS: usize = 4;
        const GETS: usize = 200;

        let watcher = LocationWatcher::new();
        let answered = Arc::new(AtomicUsize::new(0));
        let publishing = Arc::new(AtomicBool::new(true));

        // Denied clears the last fix, so gets keep racing fresh subscriptions
        let publisher = {
            let watcher = watcher.clone();
            let publishing = publishing.clone();
            tokio::task::spawn_blocking(move || {
                let mut step = 0.0;
                while publishing.load(Ordering::SeqCst) {
                    watcher.publish_location(Location::new(step, step));
                    watcher.publish_error(LocationError::Denied);
                    step += 1.0;
                }
            })
        };

        let requesters: Vec<_> = (0..REQUESTERS)
            .map(|_| {
                let watcher = watcher.clone();
                let answered = answered.clone();
                tokio::task::spawn_blocking(move || {
                    for _ in 0..GETS {
                        let answered = answered.clone();
                        watcher.get(move |fix| {
                            if fix.is_ok() {
                                answered.fetch_add(1, Ordering::SeqCst);
                            }
                        });
                    }
                })
            })
            .collect();
        for requester in requesters {
            requester.await.unwrap();
        }
        publishing.store(false, Ordering::SeqCst);
        publisher.await.unwrap();

        watcher.publish_location(Location::new(-1.0, -1.0));
        let expected = REQUESTERS * GETS;
        tokio::time::timeout(Duration::from_secs(5), async {
            while answered.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(answered.load(Ordering::SeqCst), expected);
        assert_eq!(watcher.watcher_count(), 0);
        assert!(!watcher.is_updating());
    }
}
