mod actor;
mod metric;
mod patch;
mod playbook;

pub use actor::{Actor, Capability};
pub use metric::{Metric, MetricId, MetricType, MetricUpdate, NewMetric};
pub use patch::Patch;
pub use playbook::{Playbook, PlaybookField, PlaybookId, PlaybookUpdate};
