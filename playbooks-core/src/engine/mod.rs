//! The update pipeline: diff, structural validation, field-level
//! authorization and the orchestrator that persists the result.

mod diff;
mod orchestrator;
mod policy;
mod validate;

pub use diff::{diff_playbook, FieldChange, FieldValue, PlaybookDiff};
pub use orchestrator::{MutationOrchestrator, MutationStage, UpdateOutcome};
pub use policy::{rules_for, FieldRule, PolicyDecision, PolicyEvaluator, FIELD_RULES};
pub use validate::StructuralValidator;
