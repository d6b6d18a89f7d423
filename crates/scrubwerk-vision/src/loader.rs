// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Model slot — lazy, load-once ownership of a single inference model.
//
// A slot moves Unloaded -> Loading -> Ready | Failed and never goes back.
// Any number of threads may ask for the model; exactly one of them (or the
// background thread started by `start_loading`) runs the loader, the rest
// block until it finishes. A failed load is sticky: every later caller sees
// the same error without the loader being retried.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use scrubwerk_core::error::{Result, ScrubError};
use tracing::{debug, error, info, instrument, warn};

use crate::runtime::{ModelLoader, SharedModel, backend_enabled, default_loader};

enum SlotState {
    Unloaded,
    Loading,
    Ready(SharedModel),
    Failed(String),
}

pub struct ModelSlot {
    name: &'static str,
    path: PathBuf,
    loader: ModelLoader,
    /// False when the build has no way to execute the model at all.
    runnable: bool,
    state: Mutex<SlotState>,
    changed: Condvar,
    load_count: AtomicUsize,
}

impl ModelSlot {
    /// Slot backed by the crate's default backend.
    pub fn new(name: &'static str, path: impl Into<PathBuf>) -> Self {
        let mut slot = Self::with_loader(name, path, default_loader());
        slot.runnable = backend_enabled();
        slot
    }

    /// Slot backed by a caller-supplied loader.
    pub fn with_loader(name: &'static str, path: impl Into<PathBuf>, loader: ModelLoader) -> Self {
        Self {
            name,
            path: path.into(),
            loader,
            runnable: true,
            state: Mutex::new(SlotState::Unloaded),
            changed: Condvar::new(),
            load_count: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the model file exists and this build can run it.
    pub fn is_available(&self) -> bool {
        self.runnable && self.path.is_file()
    }

    /// True once the model has loaded successfully.
    pub fn is_initialized(&self) -> bool {
        matches!(*self.lock(), SlotState::Ready(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(*self.lock(), SlotState::Loading)
    }

    /// The sticky load error, if the slot has failed.
    pub fn failure(&self) -> Option<String> {
        match &*self.lock() {
            SlotState::Failed(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    /// How many times the loader has been invoked. Never exceeds one.
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }

    /// Kick off loading on a background thread. No-op unless the slot is
    /// still `Unloaded`.
    pub fn start_loading(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if !matches!(*state, SlotState::Unloaded) {
                return;
            }
            *state = SlotState::Loading;
        }

        let slot = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("scrubwerk-load-{}", self.name))
            .spawn(move || slot.run_loader());

        if let Err(err) = spawned {
            warn!(model = self.name, %err, "could not spawn loader thread; loading inline");
            self.run_loader();
        }
    }

    /// Get the model, loading it on this thread if nobody has started yet
    /// and waiting if someone else is loading it.
    pub fn get(&self) -> Result<SharedModel> {
        let mut state = self.lock();
        loop {
            let loading = match &*state {
                SlotState::Ready(model) => return Ok(Arc::clone(model)),
                SlotState::Failed(msg) => return Err(ScrubError::ModelLoad(msg.clone())),
                SlotState::Loading => true,
                SlotState::Unloaded => false,
            };

            if loading {
                state = self
                    .changed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            } else {
                *state = SlotState::Loading;
                drop(state);
                self.run_loader();
                state = self.lock();
            }
        }
    }

    /// Start loading if nobody has, then wait at most `timeout`. `Ok(true)`
    /// once ready, `Ok(false)` if the timeout elapses first, and the sticky
    /// error if the load failed. A timeout leaves the load running.
    #[instrument(skip(self), fields(model = self.name))]
    pub fn await_ready(self: &Arc<Self>, timeout: Duration) -> Result<bool> {
        self.start_loading();
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| matches!(s, SlotState::Loading))
            .unwrap_or_else(PoisonError::into_inner);

        match &*state {
            SlotState::Ready(_) => Ok(true),
            SlotState::Failed(msg) => Err(ScrubError::ModelLoad(msg.clone())),
            SlotState::Loading | SlotState::Unloaded => {
                debug!("timed out waiting for model");
                Ok(false)
            }
        }
    }

    /// `await_ready` followed by `get`: the model, or `ModelNotReady` if it
    /// is still loading when `timeout` elapses.
    pub fn get_within(self: &Arc<Self>, timeout: Duration) -> Result<SharedModel> {
        if !self.await_ready(timeout)? {
            return Err(ScrubError::ModelNotReady(timeout_ms(timeout)));
        }
        self.get()
    }

    /// Runs the loader exactly once. The caller must have moved the state to
    /// `Loading`.
    fn run_loader(&self) {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        info!(model = self.name, path = %self.path.display(), "Loading model");

        let outcome = (self.loader)(&self.path);
        let mut state = self.lock();
        *state = match outcome {
            Ok(model) => {
                info!(model = self.name, "Model ready");
                SlotState::Ready(model)
            }
            Err(err) => {
                error!(model = self.name, %err, "Model failed to load");
                SlotState::Failed(match err {
                    ScrubError::ModelLoad(msg) => msg,
                    other => other.to_string(),
                })
            }
        };
        drop(state);
        self.changed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ModelSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSlot")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("initialized", &self.is_initialized())
            .field("load_count", &self.load_count())
            .finish()
    }
}

/// Whole milliseconds in `timeout`, saturating at `u64::MAX`.
fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ModelRuntime, Tensor};
    use std::sync::Barrier;

    struct Echo;

    impl ModelRuntime for Echo {
        fn run(&self, input: Tensor, _outputs: &[&str]) -> Result<Vec<Tensor>> {
            Ok(vec![input])
        }
    }

    fn slow_loader(delay: Duration, fail: bool) -> ModelLoader {
        Arc::new(move |_path: &Path| {
            thread::sleep(delay);
            if fail {
                Err(ScrubError::ModelLoad("corrupt model file".into()))
            } else {
                Ok(Arc::new(Echo) as SharedModel)
            }
        })
    }

    #[test]
    fn get_loads_once_on_first_use() {
        let slot = ModelSlot::with_loader("echo", "/nowhere", slow_loader(Duration::ZERO, false));
        assert!(!slot.is_initialized());
        slot.get().unwrap();
        slot.get().unwrap();
        assert!(slot.is_initialized());
        assert_eq!(slot.load_count(), 1);
    }

    #[test]
    fn concurrent_get_shares_one_load() {
        let slot = Arc::new(ModelSlot::with_loader(
            "echo",
            "/nowhere",
            slow_loader(Duration::from_millis(50), false),
        ));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    slot.get().is_ok()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(slot.load_count(), 1);
    }

    #[test]
    fn failure_is_sticky_for_every_waiter() {
        let slot = Arc::new(ModelSlot::with_loader(
            "broken",
            "/nowhere",
            slow_loader(Duration::from_millis(50), true),
        ));
        slot.start_loading();

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || slot.await_ready(Duration::from_secs(5)))
            })
            .collect();

        let messages: Vec<String> = waiters
            .into_iter()
            .map(|h| h.join().unwrap().unwrap_err().to_string())
            .collect();
        assert_eq!(messages[0], messages[1]);
        assert!(messages[0].contains("corrupt model file"));

        assert!(slot.get().is_err());
        assert_eq!(slot.load_count(), 1);
        assert!(slot.failure().is_some());
    }

    #[test]
    fn await_ready_times_out_while_loading() {
        let slot = Arc::new(ModelSlot::with_loader(
            "slow",
            "/nowhere",
            slow_loader(Duration::from_millis(300), false),
        ));
        slot.start_loading();
        assert!(!slot.await_ready(Duration::from_millis(10)).unwrap());
        assert!(slot.await_ready(Duration::from_secs(5)).unwrap());
    }

    #[test]
    fn start_loading_twice_is_a_noop() {
        let slot = Arc::new(ModelSlot::with_loader(
            "echo",
            "/nowhere",
            slow_loader(Duration::from_millis(20), false),
        ));
        slot.start_loading();
        slot.start_loading();
        assert!(slot.await_ready(Duration::from_secs(5)).unwrap());
        slot.start_loading();
        assert_eq!(slot.load_count(), 1);
    }

    #[test]
    fn await_ready_starts_an_unloaded_slot() {
        let slot = Arc::new(ModelSlot::with_loader(
            "echo",
            "/nowhere",
            slow_loader(Duration::from_millis(20), false),
        ));
        assert!(slot.await_ready(Duration::from_secs(5)).unwrap());
        assert!(slot.is_initialized());
        assert_eq!(slot.load_count(), 1);
    }

    #[test]
    fn get_within_reports_not_ready() {
        let slot = Arc::new(ModelSlot::with_loader(
            "slow",
            "/nowhere",
            slow_loader(Duration::from_millis(300), false),
        ));
        match slot.get_within(Duration::from_millis(5)) {
            Err(ScrubError::ModelNotReady(5)) => {}
            other => panic!("expected ModelNotReady, got {:?}", other.map(|_| ())),
        }
        assert!(slot.get_within(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn timeout_millis_saturate() {
        assert_eq!(timeout_ms(Duration::from_millis(250)), 250);
        assert_eq!(timeout_ms(Duration::from_micros(1_999)), 1);
        assert_eq!(timeout_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn availability_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.rten");
        let slot = ModelSlot::with_loader("echo", &path, slow_loader(Duration::ZERO, false));
        assert!(!slot.is_available());
        std::fs::write(&path, b"weights").unwrap();
        assert!(slot.is_available());
    }
}
