#![allow(
    clippy::needless_borrows_for_generic_args,
    clippy::manual_range_contains,
    clippy::derivable_impls,
    clippy::type_complexity,
    clippy::len_zero,
    dead_code,
    unused_imports,
    unused_variables,
    unused_mut
)]

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod models;
pub mod repo;

pub use config::{
    get_config_dir, ConfigLoadError, DatabaseConfig, LimitsConfig, LoggingConfig,
    MembershipConfig, OrchestratorConfig, PlaybooksConfig,
};
pub use db::{applied_migrations, open_pool, DatabaseError};
pub use engine::{
    diff_playbook, rules_for, FieldChange, FieldRule, FieldValue, MutationOrchestrator,
    MutationStage, PlaybookDiff, PolicyDecision, PolicyEvaluator, StructuralValidator,
    UpdateOutcome, FIELD_RULES,
};
pub use error::{
    retry_async_with_config, CliErrorDisplay, ErrorKind, PlaybookError,
    PlaybookResult, RetryConfig,
};
pub use membership::{
    DynMembershipOracle, HttpMembershipOracle, InMemoryMembership, MembershipOracle,
    MembershipScope,
};
pub use metrics::MetricCollection;
pub use models::{
    Actor, Capability, Metric, MetricId, MetricType, MetricUpdate, NewMetric, Patch, Playbook,
    PlaybookField, PlaybookId, PlaybookUpdate,
};
pub use repo::{DynPlaybookStore, InMemoryPlaybookStore, PgPlaybookRepository, PlaybookStore};
