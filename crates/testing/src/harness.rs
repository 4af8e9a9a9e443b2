//! Ready-made engine assembly for integration tests.

use std::sync::Arc;

use order_saga_core::engine::{
    OrderItem, PaymentInfo, SagaEngine, SagaEngineConfig, ShippingInfo, StartSagaCommand,
};
use order_saga_core::handlers::register_defaults;
use order_saga_core::hook::HookSet;
use order_saga_core::registry::StateHandlerRegistry;

use crate::factory::{ScriptBook, ScriptedSagaFactory};
use crate::hooks::{DuplicateCheckHook, TransactionLogHook, ValidationHook};
use crate::memory_repository::InMemorySagaRepository;

/// A fully wired engine over the in-memory repository and scripted steps.
pub struct TestHarness {
    pub engine: Arc<SagaEngine>,
    pub repository: Arc<InMemorySagaRepository>,
    pub factory: Arc<ScriptedSagaFactory>,
}

impl TestHarness {
    /// Default assembly: standard handlers, the three example hooks, default
    /// engine config.
    pub fn new(book: ScriptBook) -> Self {
        Self::builder(book).build()
    }

    pub fn builder(book: ScriptBook) -> TestHarnessBuilder {
        TestHarnessBuilder {
            factory: ScriptedSagaFactory::new(book),
            config: SagaEngineConfig::default(),
            with_hooks: true,
        }
    }
}

/// Builder for non-default assemblies.
pub struct TestHarnessBuilder {
    factory: ScriptedSagaFactory,
    config: SagaEngineConfig,
    with_hooks: bool,
}

impl TestHarnessBuilder {
    /// Give every created context an explicit timeout.
    pub fn with_timeout(mut self, timeout: chrono::Duration) -> Self {
        self.factory = self.factory.with_timeout(timeout);
        self
    }

    pub fn with_config(mut self, config: SagaEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Assemble without any hooks.
    pub fn without_hooks(mut self) -> Self {
        self.with_hooks = false;
        self
    }

    pub fn build(self) -> TestHarness {
        let repository = Arc::new(InMemorySagaRepository::new());
        let factory = Arc::new(self.factory);

        let mut registry = StateHandlerRegistry::new();
        register_defaults(&mut registry);

        let mut hooks = HookSet::new();
        if self.with_hooks {
            hooks
                .register(Arc::new(DuplicateCheckHook::new(repository.clone())))
                .register(Arc::new(ValidationHook))
                .register(Arc::new(TransactionLogHook));
        }

        let engine = Arc::new(SagaEngine::new(
            self.config,
            repository.clone(),
            Arc::new(registry),
            Arc::new(hooks),
            factory.clone(),
        ));

        TestHarness {
            engine,
            repository,
            factory,
        }
    }
}

/// Install a log subscriber for test runs. Safe to call from every test;
/// only the first call wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// A single-item order command for tests.
pub fn sample_command(order_no: &str) -> StartSagaCommand {
    StartSagaCommand {
        order_no: order_no.to_string(),
        customer_id: 42,
        items: vec![OrderItem {
            product_id: "SKU-001".to_string(),
            product_name: "Mechanical Keyboard".to_string(),
            quantity: 1,
            unit_price: 12_900,
            total_price: 12_900,
        }],
        payment: PaymentInfo {
            method: "CARD".to_string(),
            account_id: "acct-42".to_string(),
            amount: 12_900,
            currency: "USD".to_string(),
        },
        shipping: ShippingInfo {
            recipient_name: "Dana Smith".to_string(),
            address: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            postal_code: "12345".to_string(),
            phone: "555-0100".to_string(),
        },
        metadata: None,
    }
}
