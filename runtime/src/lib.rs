//! # Kiosk Runtime
//!
//! Store runtime for the attendance kiosk.
//!
//! This crate provides the Store that coordinates reducer execution and
//! effect handling.
//!
//! ## Core Components
//!
//! - **Store**: Owns state, runs the reducer under a write lock and executes effects
//! - **Effect Executor**: Runs effect descriptions and feeds produced actions back
//! - **Cancellation Registry**: Tracks effects registered under an [`EffectId`] so
//!   they can be cancelled (device switches, stop, teardown)
//!
//! ## Example
//!
//! ```ignore
//! use kiosk_runtime::Store;
//!
//! let store = Store::new(ScanState::default(), ScanReducer, environment);
//!
//! // Send an action
//! store.send(ScanAction::Start).await?;
//!
//! // Read state
//! let phase = store.state(|s| s.phase.clone()).await;
//! ```

use kiosk_core::{
    effect::{Effect, EffectId},
    reducer::Reducer,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

pub use error::StoreError;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// Returned when `send()` is called after shutdown was initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for a matching action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the action broadcast channel
    pub broadcast_capacity: usize,
    /// Default timeout for graceful shutdown
    pub default_shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Set the broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 16,
            default_shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects of one
/// action to complete. Actions fed back by those effects get their own
/// handles and are not tracked here.
///
/// Effects registered as cancellable count as running until they finish or
/// are cancelled, so waiting on the handle of an action that started an
/// endless stream only returns once that stream is cancelled.
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };
        let tracking = EffectTracking {
            counter,
            notifier: tx,
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Wait until the effect counter reaches zero
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the timeout expires first.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// RAII guard that decrements the handle counter on drop
///
/// Runs on completion, on panic and on cancellation alike.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A task registered under an [`EffectId`]
struct CancellableTask {
    generation: u64,
    handle: JoinHandle<()>,
}

type CancellableRegistry = Arc<Mutex<HashMap<EffectId, CancellableTask>>>;

fn lock_registry(registry: &Mutex<HashMap<EffectId, CancellableTask>>) -> MutexGuard<'_, HashMap<EffectId, CancellableTask>> {
    // The map stays consistent even if a holder panicked.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

type EffectFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        lock_registry, Arc, AtomicBool, AtomicCounterGuard, AtomicU64, AtomicUsize,
        CancellableRegistry, CancellableTask, DecrementGuard, Duration, Effect, EffectFuture,
        EffectHandle, EffectId, EffectTracking, HashMap, Mutex, Ordering, Reducer, RwLock,
        StoreConfig, StoreError,
    };
    use futures::StreamExt;
    use tokio::sync::broadcast;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop and cancellation)
    ///
    /// # Type Parameters
    ///
    /// - `S`: State type
    /// - `A`: Action type
    /// - `E`: Environment type
    /// - `R`: Reducer implementation
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        config: StoreConfig,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        cancellables: CancellableRegistry,
        next_generation: Arc<AtomicU64>,
        /// Every action produced by an effect is published here before it is
        /// fed back into the reducer.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        /// Create a new store with the default configuration
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a new store with a custom configuration
        #[must_use]
        pub fn with_config(initial_state: S, reducer: R, environment: E, config: StoreConfig) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                config,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                cancellables: Arc::new(Mutex::new(HashMap::new())),
                next_generation: Arc::new(AtomicU64::new(0)),
                action_broadcast,
            }
        }

        /// The store configuration
        #[must_use]
        pub const fn config(&self) -> &StoreConfig {
            &self.config
        }

        /// Ids of the cancellable effects currently running
        #[must_use]
        pub fn active_effect_ids(&self) -> Vec<EffectId> {
            let mut ids: Vec<EffectId> = lock_registry(&self.cancellables)
                .iter()
                .filter(|(_, task)| !task.handle.is_finished())
                .map(|(id, _)| *id)
                .collect();
            ids.sort();
            ids
        }

        /// Initiate graceful shutdown
        ///
        /// 1. Rejects new actions
        /// 2. Cancels every registered cancellable effect, waiting for each to be dropped
        /// 3. Waits for the remaining effects to finish
        ///
        /// Calling it again after a successful shutdown returns `Ok(())`.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        #[tracing::instrument(skip(self), name = "store_shutdown")]
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            let registered: Vec<(EffectId, CancellableTask)> =
                lock_registry(&self.cancellables).drain().collect();
            for (id, task) in registered {
                tracing::debug!(effect_id = %id, "Cancelling effect for shutdown");
                task.handle.abort();
                let _ = task.handle.await;
                metrics::counter!("store.effects.cancelled", "id" => id.as_str()).increment(1);
            }

            let start = tokio::time::Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    metrics::counter!("store.shutdown.completed").increment(1);
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(pending_effects = pending, "Shutdown timed out");
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tracing::debug!(
                    pending_effects = pending,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Waiting for effects to complete"
                );
                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires the write lock on state
        /// 2. Calls the reducer with (state, action, environment)
        /// 3. Starts the returned effects in background tasks
        ///
        /// Returns after the effects were started, not completed.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.commands.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!(effects = effects.len(), "Reducer completed");
                effects
            };

            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }

            Ok(handle)
        }

        /// Send an action and wait for a matching action produced by effects
        ///
        /// Subscribes before sending, so a fast effect cannot be missed.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: no matching action before `timeout`
        /// - [`StoreError::ChannelClosed`]: broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to every action produced by effects
        ///
        /// Actions sent directly via [`Store::send`] are not broadcast.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Start an effect returned by the reducer
        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking) {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
                Effect::Cancellable { id, effect } => {
                    self.register_cancellable(id, *effect, tracking);
                },
                effect => {
                    tracking.increment();
                    self.pending_effects.fetch_add(1, Ordering::SeqCst);
                    let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));
                    let guard = DecrementGuard(tracking.clone());
                    let work = self.run_effect(effect, tracking);

                    tokio::spawn(async move {
                        let _guard = guard;
                        let _pending_guard = pending_guard;
                        work.await;
                    });
                },
            }
        }

        /// Build the future that runs `effect` to completion
        fn run_effect(&self, effect: Effect<A>, tracking: EffectTracking) -> EffectFuture {
            let store = self.clone();

            Box::pin(async move {
                match effect {
                    Effect::None => {},
                    Effect::Future(fut) => {
                        metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                        if let Some(action) = fut.await {
                            store.feed(action).await;
                        }
                    },
                    Effect::Delay { duration, action } => {
                        metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                        tokio::time::sleep(duration).await;
                        store.feed(*action).await;
                    },
                    Effect::Stream(mut stream) => {
                        metrics::counter!("store.effects.executed", "type" => "stream").increment(1);
                        let mut items = 0_u64;
                        while let Some(action) = stream.next().await {
                            items += 1;
                            store.feed(action).await;
                        }
                        tracing::trace!(items, "Effect::Stream completed");
                    },
                    Effect::Parallel(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                        let runs = effects
                            .into_iter()
                            .map(|effect| store.run_effect(effect, tracking.clone()));
                        futures::future::join_all(runs).await;
                    },
                    Effect::Sequential(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "sequential").increment(1);
                        for effect in effects {
                            store.run_effect(effect, tracking.clone()).await;
                        }
                    },
                    Effect::Cancellable { id, effect } => {
                        store.register_cancellable(id, *effect, tracking);
                    },
                    Effect::Cancel(id) => {
                        store.cancel(id).await;
                    },
                }
            })
        }

        /// Run `effect` in its own task registered under `id`
        ///
        /// A task already registered under `id` is aborted.
        fn register_cancellable(&self, id: EffectId, effect: Effect<A>, tracking: EffectTracking) {
            metrics::counter!("store.effects.executed", "type" => "cancellable").increment(1);

            tracking.increment();
            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            let pending_guard = AtomicCounterGuard(Arc::clone(&self.pending_effects));
            let guard = DecrementGuard(tracking.clone());

            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            let registry = Arc::clone(&self.cancellables);
            let work = self.run_effect(effect, tracking);

            let mut tasks = lock_registry(&self.cancellables);
            let handle = tokio::spawn(async move {
                let _guard = guard;
                let _pending_guard = pending_guard;
                work.await;

                let mut tasks = lock_registry(&registry);
                if tasks.get(&id).is_some_and(|task| task.generation == generation) {
                    tasks.remove(&id);
                }
            });

            if let Some(previous) = tasks.insert(id, CancellableTask { generation, handle }) {
                tracing::debug!(effect_id = %id, "Replacing running cancellable effect");
                previous.handle.abort();
                metrics::counter!("store.effects.cancelled", "id" => id.as_str()).increment(1);
            }
        }

        /// Abort the task registered under `id` and wait until it is dropped
        async fn cancel(&self, id: EffectId) {
            let task = lock_registry(&self.cancellables).remove(&id);

            if let Some(task) = task {
                tracing::debug!(effect_id = %id, "Cancelling effect");
                task.handle.abort();
                let _ = task.handle.await;
                metrics::counter!("store.effects.cancelled", "id" => id.as_str()).increment(1);
            } else {
                tracing::trace!(effect_id = %id, "Nothing registered to cancel");
            }
        }

        /// Broadcast an effect-produced action, then feed it back into the reducer
        async fn feed(&self, action: A) {
            let _ = self.action_broadcast.send(action.clone());

            if let Err(error) = self.send(action).await {
                tracing::debug!(%error, "Feedback action dropped");
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                config: self.config.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                cancellables: Arc::clone(&self.cancellables),
                next_generation: Arc::clone(&self.next_generation),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_core::{smallvec, SmallVec};

    const TICKER: EffectId = EffectId::new("ticker");

    #[derive(Debug, Clone, Default)]
    struct TestState {
        value: i32,
        ticks: u32,
        log: Vec<String>,
    }

    #[derive(Debug, Clone)]
    enum TestAction {
        Increment,
        Log(String),
        ProduceEffect,
        ProduceDelayedAction,
        ProduceSequentialEffects,
        ProduceParallelEffects,
        StartTicker,
        Tick,
        StopTicker,
        StopTickerThenObserve,
        Observed(usize),
        LongRunning,
    }

    #[derive(Clone, Default)]
    struct TestEnv {
        live_streams: Arc<AtomicUsize>,
    }

    struct LiveGuard(Arc<AtomicUsize>);

    impl LiveGuard {
        fn new(counter: &Arc<AtomicUsize>) -> Self {
            counter.fetch_add(1, Ordering::SeqCst);
            Self(Arc::clone(counter))
        }
    }

    impl Drop for LiveGuard {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn ticker(live: Arc<AtomicUsize>) -> Effect<TestAction> {
        Effect::Stream(Box::pin(async_stream::stream! {
            let _live = LiveGuard::new(&live);
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                yield TestAction::Tick;
            }
        }))
    }

    fn after(millis: u64, action: TestAction) -> Effect<TestAction> {
        Effect::Future(Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Some(action)
        }))
    }

    #[derive(Clone)]
    struct TestReducer;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Increment => {
                    state.value += 1;
                    smallvec![Effect::None]
                },
                TestAction::Log(entry) => {
                    state.log.push(entry);
                    SmallVec::new()
                },
                TestAction::ProduceEffect => smallvec![Effect::send(TestAction::Increment)],
                TestAction::ProduceDelayedAction => {
                    smallvec![Effect::delay(Duration::from_millis(300), TestAction::Increment)]
                },
                TestAction::ProduceSequentialEffects => smallvec![Effect::chain(vec![
                    after(20, TestAction::Log("first".into())),
                    after(1, TestAction::Log("second".into())),
                ])],
                TestAction::ProduceParallelEffects => smallvec![Effect::merge(vec![
                    Effect::send(TestAction::Increment),
                    Effect::send(TestAction::Increment),
                    Effect::send(TestAction::Increment),
                ])],
                TestAction::StartTicker => {
                    smallvec![ticker(Arc::clone(&env.live_streams)).cancellable(TICKER)]
                },
                TestAction::Tick => {
                    state.ticks += 1;
                    SmallVec::new()
                },
                TestAction::StopTicker => smallvec![Effect::Cancel(TICKER)],
                TestAction::StopTickerThenObserve => {
                    let live = Arc::clone(&env.live_streams);
                    smallvec![Effect::chain(vec![
                        Effect::Cancel(TICKER),
                        Effect::Future(Box::pin(async move {
                            Some(TestAction::Observed(live.load(Ordering::SeqCst)))
                        })),
                    ])]
                },
                TestAction::Observed(_) => SmallVec::new(),
                TestAction::LongRunning => smallvec![after(5_000, TestAction::Increment)],
            }
        }
    }

    fn test_store() -> (Store<TestState, TestAction, TestEnv, TestReducer>, Arc<AtomicUsize>) {
        let env = TestEnv::default();
        let live = Arc::clone(&env.live_streams);
        (Store::new(TestState::default(), TestReducer, env), live)
    }

    #[tokio::test]
    async fn test_send_updates_state() -> Result<(), StoreError> {
        let (store, _) = test_store();

        store.send(TestAction::Increment).await?;
        store.send(TestAction::Increment).await?;

        assert_eq!(store.state(|s| s.value).await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_future_effect_feeds_back() -> Result<(), StoreError> {
        let (store, _) = test_store();

        let mut handle = store.send(TestAction::ProduceEffect).await?;
        handle.wait().await;

        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_effect_fires_after_duration() -> Result<(), StoreError> {
        let (store, _) = test_store();

        store.send(TestAction::ProduceDelayedAction).await?;

        tokio::time::sleep(Duration::from_millis(299)).await;
        assert_eq!(store.state(|s| s.value).await, 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(store.state(|s| s.value).await, 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_effects_run_in_order() -> Result<(), StoreError> {
        let (store, _) = test_store();

        let mut handle = store.send(TestAction::ProduceSequentialEffects).await?;
        handle.wait().await;

        let log = store.state(|s| s.log.clone()).await;
        assert_eq!(log, vec!["first".to_string(), "second".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_parallel_effects_all_feed_back() -> Result<(), StoreError> {
        let (store, _) = test_store();

        let mut handle = store.send(TestAction::ProduceParallelEffects).await?;
        handle.wait().await;

        assert_eq!(store.state(|s| s.value).await, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_effect_actions_are_broadcast() -> Result<(), StoreError> {
        let (store, _) = test_store();

        let result = store
            .send_and_wait_for(
                TestAction::ProduceEffect,
                |a| matches!(a, TestAction::Increment),
                Duration::from_secs(1),
            )
            .await?;

        assert!(matches!(result, TestAction::Increment));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_and_wait_for_times_out() {
        let (store, _) = test_store();

        let result = store
            .send_and_wait_for(
                TestAction::Increment,
                |a| matches!(a, TestAction::Observed(_)),
                Duration::from_millis(100),
            )
            .await;

        assert_eq!(result.err(), Some(StoreError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_items_are_fed_back() -> Result<(), StoreError> {
        let (store, live) = test_store();

        store.send(TestAction::StartTicker).await?;
        tokio::time::sleep(Duration::from_millis(35)).await;

        assert_eq!(store.state(|s| s.ticks).await, 3);
        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(store.active_effect_ids(), vec![TICKER]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_running_stream() -> Result<(), StoreError> {
        let (store, live) = test_store();

        store.send(TestAction::StartTicker).await?;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(live.load(Ordering::SeqCst), 1);

        let mut handle = store.send(TestAction::StopTicker).await?;
        handle.wait().await;

        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(store.active_effect_ids().is_empty());

        let ticks = store.state(|s| s.ticks).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.state(|s| s.ticks).await, ticks);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_effect_after_cancel_observes_release() -> Result<(), StoreError> {
        let (store, _) = test_store();

        store.send(TestAction::StartTicker).await?;
        tokio::time::sleep(Duration::from_millis(25)).await;

        let observed = store
            .send_and_wait_for(
                TestAction::StopTickerThenObserve,
                |a| matches!(a, TestAction::Observed(_)),
                Duration::from_secs(1),
            )
            .await?;

        assert!(matches!(observed, TestAction::Observed(0)));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_registering_same_id_replaces_previous() -> Result<(), StoreError> {
        let (store, live) = test_store();

        store.send(TestAction::StartTicker).await?;
        tokio::time::sleep(Duration::from_millis(15)).await;
        store.send(TestAction::StartTicker).await?;
        tokio::time::sleep(Duration::from_millis(15)).await;

        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert_eq!(store.active_effect_ids(), vec![TICKER]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_without_registration_is_noop() -> Result<(), StoreError> {
        let (store, _) = test_store();

        let mut handle = store.send(TestAction::StopTicker).await?;
        handle.wait_with_timeout(Duration::from_secs(1)).await?;
        Ok(())
    }

    mod shutdown_tests {
        use super::*;

        #[tokio::test]
        async fn test_shutdown_with_no_pending_effects() {
            let (store, _) = test_store();
            assert!(store.shutdown(Duration::from_secs(5)).await.is_ok());
        }

        #[tokio::test]
        async fn test_shutdown_rejects_new_actions() -> Result<(), StoreError> {
            let (store, _) = test_store();
            store.shutdown(Duration::from_secs(1)).await?;

            let result = store.send(TestAction::Increment).await;
            assert!(matches!(result, Err(StoreError::ShutdownInProgress)));
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn test_shutdown_cancels_registered_effects() -> Result<(), StoreError> {
            let (store, live) = test_store();

            store.send(TestAction::StartTicker).await?;
            tokio::time::sleep(Duration::from_millis(25)).await;
            assert_eq!(live.load(Ordering::SeqCst), 1);

            store.shutdown(Duration::from_secs(1)).await?;

            assert_eq!(live.load(Ordering::SeqCst), 0);
            assert!(store.active_effect_ids().is_empty());
            Ok(())
        }

        #[tokio::test(start_paused = true)]
        async fn test_shutdown_timeout() -> Result<(), StoreError> {
            let (store, _) = test_store();

            store.send(TestAction::LongRunning).await?;
            tokio::time::sleep(Duration::from_millis(10)).await;

            let result = store.shutdown(Duration::from_millis(50)).await;
            assert!(
                matches!(result, Err(StoreError::ShutdownTimeout(pending)) if pending > 0),
                "Expected ShutdownTimeout, got: {result:?}"
            );
            Ok(())
        }

        #[tokio::test]
        async fn test_shutdown_idempotent() {
            let (store, _) = test_store();

            assert!(store.shutdown(Duration::from_secs(1)).await.is_ok());
            assert!(store.shutdown(Duration::from_secs(1)).await.is_ok());
        }
    }

    #[test]
    fn test_store_config_builders() {
        let config = StoreConfig::default()
            .with_broadcast_capacity(64)
            .with_shutdown_timeout(Duration::from_secs(5));

        assert_eq!(config.broadcast_capacity, 64);
        assert_eq!(config.default_shutdown_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_completed_handle_returns_immediately() {
        let mut handle = EffectHandle::completed();
        assert!(handle.wait_with_timeout(Duration::from_millis(10)).await.is_ok());
    }
}
