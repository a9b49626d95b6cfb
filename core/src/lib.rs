//! # Kiosk Core
//!
//! Core traits and types for the attendance kiosk.
//!
//! This crate provides the fundamental abstractions the kiosk is built from:
//! the Reducer pattern for the scan state machine, effect descriptions for
//! timers and camera streams, and the capability traits behind which the
//! camera and the attendance stores live.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for a feature (e.g. the scan session)
//! - **Action**: All possible inputs to a reducer (commands and feedback from effects)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected dependencies via traits (clock, camera, stores)
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Unidirectional Data Flow
//! - Explicit Effects (no hidden I/O, no hidden timers)
//! - Dependency Injection via Environment
//!
//! ## Example
//!
//! ```ignore
//! use kiosk_core::*;
//!
//! #[derive(Clone, Debug, Default)]
//! struct ScanState {
//!     last_text: Option<String>,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum ScanAction {
//!     FrameDecoded { text: String },
//! }
//!
//! impl Reducer for ScanReducer {
//!     type State = ScanState;
//!     type Action = ScanAction;
//!     type Environment = ScanEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut ScanState,
//!         action: ScanAction,
//!         env: &ScanEnvironment,
//!     ) -> SmallVec<[Effect<ScanAction>; 4]> {
//!         // Business logic goes here
//!         SmallVec::new()
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

/// Attendance domain types and storage traits
pub mod attendance;

/// Camera capability: device enumeration and decoded-frame streams
pub mod camera;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for ScanReducer {
    ///     type State = ScanState;
    ///     type Action = ScanAction;
    ///     type Environment = ScanEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut ScanState,
    ///         action: ScanAction,
    ///         env: &ScanEnvironment,
    ///     ) -> SmallVec<[Effect<ScanAction>; 4]> {
    ///         match action {
    ///             ScanAction::Stop => {
    ///                 state.phase = ScanPhase::Idle;
    ///                 SmallVec::new()
    ///             }
    ///             _ => SmallVec::new(),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Most actions produce zero to two effects, so the result is stored
        /// inline in a `SmallVec` without allocating.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are composable and cancellable.
pub mod effect {
    use futures::Stream;
    use std::fmt;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Identifier under which a cancellable effect is registered
    ///
    /// Registering a new effect under an id that is still running cancels the
    /// previous one, so an id names a *slot* (e.g. "the decode loop") rather
    /// than an individual task. [`EffectId::keyed`] derives one slot per key
    /// from a shared name, for effects that run side by side.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct EffectId {
        name: &'static str,
        key: u64,
    }

    impl EffectId {
        /// Create a new effect id
        #[must_use]
        pub const fn new(name: &'static str) -> Self {
            Self { name, key: 0 }
        }

        /// The slot `key` under the same name
        #[must_use]
        pub const fn keyed(self, key: u64) -> Self {
            Self { name: self.name, key }
        }

        /// The id's name (for logs and metrics)
        #[must_use]
        pub const fn as_str(&self) -> &'static str {
            self.name
        }

        /// Slot key; 0 for unkeyed ids
        #[must_use]
        pub const fn key(&self) -> u64 {
            self.key
        }
    }

    impl fmt::Display for EffectId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.key == 0 {
                f.write_str(self.name)
            } else {
                write!(f, "{}#{}", self.name, self.key)
            }
        }
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (debounce windows, cooldowns, timeouts)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Long-running stream of actions
        ///
        /// Every item is fed back into the reducer as it arrives. The stream
        /// (and whatever resources it owns) is dropped when it ends or when
        /// the surrounding `Cancellable` is cancelled.
        Stream(Pin<Box<dyn Stream<Item = Action> + Send>>),

        /// Run `effect` registered under `id`
        ///
        /// Any effect still running under the same id is cancelled first.
        Cancellable {
            /// Slot the effect is registered under
            id: EffectId,
            /// The effect to run
            effect: Box<Effect<Action>>,
        },

        /// Cancel the effect registered under the id
        ///
        /// Completes only once the cancelled task has been dropped, so a
        /// following effect in a `Sequential` observes its resources released.
        /// Cancelling an id with nothing registered is a no-op.
        Cancel(EffectId),
    }

    // Manual Debug implementation since Future and Stream don't implement Debug
    impl<Action> fmt::Debug for Effect<Action>
    where
        Action: fmt::Debug,
    {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Stream(_) => write!(f, "Effect::Stream(<stream>)"),
                Effect::Cancellable { id, effect } => f
                    .debug_struct("Effect::Cancellable")
                    .field("id", id)
                    .field("effect", effect)
                    .finish(),
                Effect::Cancel(id) => f.debug_tuple("Effect::Cancel").field(id).finish(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Dispatch `action` after `duration`
        #[must_use]
        pub fn delay(duration: Duration, action: Action) -> Effect<Action> {
            Effect::Delay {
                duration,
                action: Box::new(action),
            }
        }

        /// Register this effect under `id`, replacing whatever ran there before
        #[must_use]
        pub fn cancellable(self, id: EffectId) -> Effect<Action> {
            Effect::Cancellable {
                id,
                effect: Box::new(self),
            }
        }

        /// Feed `action` straight back into the store
        ///
        /// Used to publish an output action on the store's broadcast channel.
        #[must_use]
        pub fn send(action: Action) -> Effect<Action>
        where
            Action: Send + 'static,
        {
            Effect::Future(Box::pin(async move { Some(action) }))
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
