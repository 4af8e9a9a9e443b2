//!
//! # State-Handler Registry
//!
//! Maps every [`SagaStatus`] to the handler owning it. The registry is built
//! once at startup by an explicit composition root (each handler module
//! exposes a `register` function) and is read-only afterward. It is the only
//! mechanism by which control moves from one handler to the next; handlers
//! never reference each other directly.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SagaError;
use crate::handlers::StateHandler;
use crate::status::SagaStatus;

/// Registry of status-to-handler bindings. Lookup is O(1); a status without
/// a handler is a programming error surfaced as
/// [`SagaError::StateHandlerNotFound`].
#[derive(Default)]
pub struct StateHandlerRegistry {
    handlers: HashMap<SagaStatus, Arc<dyn StateHandler>>,
}

impl StateHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to every status it declares ownership of.
    pub fn register(&mut self, handler: Arc<dyn StateHandler>) -> &mut Self {
        for status in handler.states() {
            tracing::debug!(status = %status, "registering state handler");
            self.handlers.insert(*status, Arc::clone(&handler));
        }
        self
    }

    /// Look up the handler for a status.
    pub fn get(&self, status: SagaStatus) -> Result<Arc<dyn StateHandler>, SagaError> {
        self.handlers
            .get(&status)
            .map(Arc::clone)
            .ok_or(SagaError::StateHandlerNotFound(status))
    }

    pub fn has_handler(&self, status: SagaStatus) -> bool {
        self.handlers.contains_key(&status)
    }

    /// Number of statuses with a bound handler.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
