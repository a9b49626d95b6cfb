//! Integration tests for effect lifecycles in the Store
//!
//! Restartable timers, long-running streams that hold a resource, and the
//! broadcast of feedback actions.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use kiosk_core::effect::{Effect, EffectId};
use kiosk_core::reducer::Reducer;
use kiosk_core::{SmallVec, smallvec};
use kiosk_runtime::{Store, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const QUIET: EffectId = EffectId::new("quiet");
const FEED: EffectId = EffectId::new("feed");

#[derive(Clone, Debug, PartialEq)]
enum Action {
    /// Restart the quiet timer
    Poke,
    /// Quiet timer elapsed
    Quiet,
    /// Open the feed
    OpenFeed,
    /// One item from the feed
    Item(u32),
    /// Close the feed, then report how many feeds are open
    CloseFeed,
    /// Feeds still open after closing
    Closed(usize),
}

#[derive(Clone, Debug, Default)]
struct State {
    pokes: u32,
    quiet: u32,
    items: Vec<u32>,
    closed: Option<usize>,
}

#[derive(Clone, Default)]
struct Env {
    open_feeds: Arc<AtomicUsize>,
}

struct OpenFeed(Arc<AtomicUsize>);

impl Drop for OpenFeed {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn feed(open: Arc<AtomicUsize>) -> Effect<Action> {
    Effect::Stream(Box::pin(async_stream::stream! {
        open.fetch_add(1, Ordering::SeqCst);
        let _open = OpenFeed(open);
        let mut n = 0;
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            n += 1;
            yield Action::Item(n);
        }
    }))
}

#[derive(Clone)]
struct LifecycleReducer;

impl Reducer for LifecycleReducer {
    type State = State;
    type Action = Action;
    type Environment = Env;

    fn reduce(
        &self,
        state: &mut State,
        action: Action,
        env: &Env,
    ) -> SmallVec<[Effect<Action>; 4]> {
        match action {
            Action::Poke => {
                state.pokes += 1;
                smallvec![Effect::delay(Duration::from_millis(300), Action::Quiet).cancellable(QUIET)]
            },
            Action::Quiet => {
                state.quiet += 1;
                SmallVec::new()
            },
            Action::OpenFeed => smallvec![feed(Arc::clone(&env.open_feeds)).cancellable(FEED)],
            Action::Item(n) => {
                state.items.push(n);
                SmallVec::new()
            },
            Action::CloseFeed => {
                let open = Arc::clone(&env.open_feeds);
                smallvec![Effect::chain(vec![
                    Effect::Cancel(FEED),
                    Effect::Future(Box::pin(async move {
                        Some(Action::Closed(open.load(Ordering::SeqCst)))
                    })),
                ])]
            },
            Action::Closed(open) => {
                state.closed = Some(open);
                SmallVec::new()
            },
        }
    }
}

fn store() -> (Store<State, Action, Env, LifecycleReducer>, Arc<AtomicUsize>) {
    let env = Env::default();
    let open = Arc::clone(&env.open_feeds);
    (Store::new(State::default(), LifecycleReducer, env), open)
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_restarted_timer_fires_once() {
    let (store, _) = store();

    for _ in 0..3 {
        store.send(Action::Poke).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    assert_eq!(store.state(|s| (s.pokes, s.quiet)).await, (3, 1));
    assert!(store.active_effect_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_and_wait_for_feedback() {
    let (store, _) = store();

    let action = store
        .send_and_wait_for(Action::Poke, |a| *a == Action::Quiet, Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(action, Action::Quiet);
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out() {
    let (store, _) = store();

    let result = store
        .send_and_wait_for(Action::Poke, |a| *a == Action::Quiet, Duration::from_millis(100))
        .await;

    assert_eq!(result, Err(StoreError::Timeout));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_stream_before_continuing() {
    let (store, open) = store();
    let mut actions = store.subscribe_actions();

    store.send(Action::OpenFeed).await.unwrap();
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(open.load(Ordering::SeqCst), 1);
    assert_eq!(store.active_effect_ids(), vec![FEED]);

    store.send(Action::CloseFeed).await.unwrap();
    loop {
        if let Action::Closed(still_open) = actions.recv().await.unwrap() {
            assert_eq!(still_open, 0);
            break;
        }
    }

    let items = store.state(|s| s.items.clone()).await;
    assert_eq!(items, vec![1, 2, 3]);
    assert!(store.active_effect_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_streams() {
    let (store, open) = store();

    store.send(Action::OpenFeed).await.unwrap();
    store.send(Action::Poke).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(open.load(Ordering::SeqCst), 1);

    store.shutdown(Duration::from_secs(1)).await.unwrap();

    assert_eq!(open.load(Ordering::SeqCst), 0);
    assert_eq!(store.state(|s| s.quiet).await, 0);
    assert_eq!(store.send(Action::Poke).await.err(), Some(StoreError::ShutdownInProgress));
}
