//! # order-saga-testing
//!
//! In-memory adapters and scripted collaborators for exercising the saga
//! engine without real infrastructure: a full [`SagaRepository`]
//! implementation, a step whose outcomes are scripted per call, a factory
//! building the four-step order flow, example hooks, and a prewired test
//! harness.
//!
//! The integration suites under `tests/` drive the engine end to end:
//! happy path, compensation, manual review, async callbacks, crash
//! recovery, concurrency and the state-mapping laws.
//!
//! [`SagaRepository`]: order_saga_core::port::SagaRepository

pub mod factory;
pub mod harness;
pub mod hooks;
pub mod memory_repository;
pub mod scripted_step;

pub use factory::{ScriptBook, ScriptedSagaFactory};
pub use harness::{init_tracing, sample_command, TestHarness, TestHarnessBuilder};
pub use hooks::{DuplicateCheckHook, TransactionLogHook, ValidationHook};
pub use memory_repository::InMemorySagaRepository;
pub use scripted_step::ScriptedStep;
