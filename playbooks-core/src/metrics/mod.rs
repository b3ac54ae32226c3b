//! Ordered, identity-keyed metric storage for a single playbook.

mod collection;

pub use collection::MetricCollection;
