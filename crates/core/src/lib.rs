//! # order-saga-core
//!
//! Core saga orchestration engine with zero infrastructure dependencies.
//! Drives a multi-step distributed transaction through a deterministic state
//! machine, persists progress through a port, reacts to synchronous and
//! asynchronous step outcomes, triggers compensating actions on failure, and
//! recovers in-flight sagas after a restart.
//!
//! ## Architecture
//!
//! This crate defines the state machine and the step execution/compensation
//! engine. Persistence backends, concrete step implementations, hooks and
//! transports plug in through the traits in [`port`], [`step`], [`hook`] and
//! [`engine`].
//!
//! ## Modules
//!
//! - [`status`]: [`SagaStatus`], [`StepStatus`] and their predicates
//! - [`step`]: [`SagaStep`] contract, [`StepResult`], [`StepLog`], [`StepState`]
//! - [`context`]: [`SagaContext`], cursors, timeout budget, failure evaluation
//! - [`port`]: [`SagaRepository`] persistence port
//! - [`hook`]: before/after [`Hook`] chain
//! - [`registry`]: [`StateHandlerRegistry`]
//! - [`handlers`]: the five state handlers and the [`StateHandler`] contract
//! - [`engine`]: [`SagaEngine`] entry point and commands
//! - [`recovery`]: [`RecoverySweeper`] stuck-saga sweep
//! - [`error`]: [`ErrorCode`], [`SagaError`]
//!
//! ## Control flow
//!
//! The engine starts or resumes a saga, looks up the handler for its status
//! and invokes it. Handlers do a bounded amount of work, then either reach a
//! terminal state, park the saga awaiting an external callback, or
//! transition the status and hand control back to the dispatch loop. Within
//! a saga everything is sequential; concurrency exists only across sagas.

pub mod context;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod hook;
pub mod port;
pub mod recovery;
pub mod registry;
pub mod status;
pub mod step;

pub use context::SagaContext;
pub use engine::{
    OrderItem, PaymentInfo, ResumeSagaCommand, SagaEngine, SagaEngineConfig, SagaFactory,
    ShippingInfo, StartSagaCommand,
};
pub use error::{ErrorCode, SagaError};
pub use handlers::{
    register_defaults, Flow, HandlerDeps, InitHandler, ProcessingHandler, ResumingHandler,
    RevertingHandler, StateHandler, TerminalHandler,
};
pub use hook::{Hook, HookFailure, HookKind, HookResult, HookSet};
pub use port::{RepositoryError, SagaRepository};
pub use recovery::{RecoveryConfig, RecoverySweeper};
pub use registry::StateHandlerRegistry;
pub use status::{SagaStatus, StepStatus};
pub use step::{SagaStep, StepAction, StepLog, StepResult, StepState};
