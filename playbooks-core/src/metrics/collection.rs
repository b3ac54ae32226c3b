use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{PlaybookError, PlaybookResult};
use crate::models::{Metric, MetricId, MetricUpdate};

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    metric: Metric,
}

/// The ordered metrics of one playbook.
///
/// Metrics are stored by identity; order comes from a monotonically increasing
/// sequence number assigned on insert. Removing a metric drops its sequence
/// entry, so later metrics move up one position while keeping their relative
/// order, and updates never touch the sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Metric>", into = "Vec<Metric>")]
pub struct MetricCollection {
    slots: HashMap<MetricId, Slot>,
    order: BTreeMap<u64, MetricId>,
    next_seq: u64,
}

impl MetricCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &MetricId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn get(&self, id: &MetricId) -> Option<&Metric> {
        self.slots.get(id).map(|slot| &slot.metric)
    }

    /// Zero-based position of the metric in display order.
    pub fn position(&self, id: &MetricId) -> Option<usize> {
        let seq = self.slots.get(id)?.seq;
        Some(self.order.range(..seq).count())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> + '_ {
        self.order
            .values()
            .filter_map(move |id| self.slots.get(id).map(|slot| &slot.metric))
    }

    pub fn ids(&self) -> impl Iterator<Item = &MetricId> + '_ {
        self.order.values()
    }

    pub fn to_vec(&self) -> Vec<Metric> {
        self.iter().cloned().collect()
    }

    /// Appends `metric` as the last element.
    pub fn push(&mut self, metric: Metric) -> PlaybookResult<&Metric> {
        if self.slots.contains_key(&metric.id) {
            return Err(PlaybookError::invalid_field(
                "id",
                format!("metric '{}' already exists", metric.id),
            ));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let id = metric.id.clone();
        self.order.insert(seq, id.clone());
        let slot = self.slots.entry(id).or_insert(Slot { seq, metric });
        Ok(&slot.metric)
    }

    /// Applies `update` in place, keeping the metric's position.
    pub fn update(&mut self, id: &MetricId, update: &MetricUpdate) -> PlaybookResult<bool> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| PlaybookError::MetricNotFound(id.to_string()))?;
        Ok(update.apply_to(&mut slot.metric))
    }

    pub fn remove(&mut self, id: &MetricId) -> PlaybookResult<Metric> {
        let slot = self
            .slots
            .remove(id)
            .ok_or_else(|| PlaybookError::MetricNotFound(id.to_string()))?;
        self.order.remove(&slot.seq);
        Ok(slot.metric)
    }

    /// Whether another metric already uses `title`, compared case-insensitively.
    pub fn has_title(&self, title: &str, except: Option<&MetricId>) -> bool {
        let wanted = title.trim().to_lowercase();
        self.iter()
            .filter(|m| Some(&m.id) != except)
            .any(|m| m.title.trim().to_lowercase() == wanted)
    }
}

impl PartialEq for MetricCollection {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for MetricCollection {}

impl From<Vec<Metric>> for MetricCollection {
    fn from(metrics: Vec<Metric>) -> Self {
        let mut collection = MetricCollection::new();
        for metric in metrics {
            // Duplicate ids in stored data keep the first occurrence.
            let _ = collection.push(metric);
        }
        collection
    }
}

impl From<MetricCollection> for Vec<Metric> {
    fn from(collection: MetricCollection) -> Self {
        collection.to_vec()
    }
}

impl FromIterator<Metric> for MetricCollection {
    fn from_iter<I: IntoIterator<Item = Metric>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}
