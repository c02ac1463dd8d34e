//! Campaign automation engine: decides when rules are due, evaluates them
//! against fresh metrics and runs their actions on the ad platform.

pub mod api;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod guard;
pub mod http;
pub mod notifier;
pub mod retry;
pub mod runner;
pub mod runtime;
pub mod scheduler;
pub mod task;

pub use api::{EngineApiBuilder, EngineServices, RunningEngine};
pub use config::EngineConfig;
pub use connector::{AdPlatformConnector, EntityMutation, EntityState, InMemoryConnector, PlatformLimits};
pub use dispatcher::{Dispatcher, SnapshotEvent};
pub use error::{ConnectorError, EngineError, ExecutionError, ExecutionErrorCode};
pub use executor::{ActionContext, ActionExecutor, ActionReport, Executors};
pub use guard::{GuardVerdict, LockTable};
pub use http::HttpConnector;
pub use notifier::{LogNotifier, MemoryNotifier, Notification, Notifier, WebhookNotifier};
pub use retry::RetryPolicy;
pub use runner::RuleRunner;
pub use runtime::{EngineHandle, ExecutionRuntime, TaskHandler};
pub use scheduler::EvaluationQueue;
pub use task::{CycleOutcome, EvaluationTask, RuntimeStats, SkipReason, TaskTrigger};
