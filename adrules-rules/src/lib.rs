//! Rule model, validation and storage for the campaign automation engine.
//!
//! Rules pair metric conditions over a set of advertising entities with a
//! management action. This crate owns their definition, validation, storage,
//! execution history and template catalogue, plus the REST API that manages
//! them. Running rules is the job of `adrules-engine`.

pub mod action;
pub mod alert;
pub mod condition;
pub mod draft;
pub mod error;
pub mod history;
mod loader;
pub mod pg;
pub mod rule;
mod service;
pub mod store;
pub mod template;

pub use action::{Action, ChangeType, ChangeUnit, ExecutionType, ValueChange};
pub use alert::{AlertLog, AlertSink, OperationalAlert, TracingAlertSink};
pub use condition::{evaluate, Condition, ConditionValue, EvaluationError, Operator};
pub use draft::{RuleDraft, RulePatch};
pub use error::{FieldViolation, RuleError, ValidationError};
pub use history::{ExecutionHistoryEntry, HistoryLogger};
pub use loader::load_templates;
pub use rule::{EvaluationType, Rule, RuleFilter, RuleStatus, Schedule, ScheduleType};
pub use service::{ApiError, ErrorResponse, RuleApiBuilder};
pub use store::RuleStore;
pub use template::{RuleTemplate, TemplateCatalog, TemplateInstance};
