use serde::Serialize;
use std::collections::HashSet;

use crate::error::{PlaybookError, PlaybookResult};
use crate::models::{Patch, Playbook, PlaybookField, PlaybookUpdate};

/// A field value as seen by the diff, independent of the field's Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    OptionalText(Option<String>),
    Flag(bool),
    List(Vec<String>),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{:?}", s),
            FieldValue::OptionalText(Some(s)) => write!(f, "{:?}", s),
            FieldValue::OptionalText(None) => write!(f, "none"),
            FieldValue::Flag(b) => write!(f, "{}", b),
            FieldValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: PlaybookField,
    pub old: FieldValue,
    pub new: FieldValue,
}

/// The effective changes of a [`PlaybookUpdate`] against a stored playbook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybookDiff {
    changes: Vec<FieldChange>,
}

impl PlaybookDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    pub fn changed_fields(&self) -> Vec<PlaybookField> {
        self.changes.iter().map(|c| c.field).collect()
    }

    pub fn touches(&self, field: PlaybookField) -> bool {
        self.get(field).is_some()
    }

    pub fn get(&self, field: PlaybookField) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    /// Writes exactly the diffed fields onto `playbook`.
    pub fn apply_to(&self, playbook: &mut Playbook) -> PlaybookResult<()> {
        for change in &self.changes {
            match (change.field, &change.new) {
                (PlaybookField::Title, FieldValue::Text(v)) => playbook.title = v.clone(),
                (PlaybookField::Description, FieldValue::Text(v)) => {
                    playbook.description = v.clone()
                }
                (PlaybookField::DefaultOwnerId, FieldValue::OptionalText(v)) => {
                    playbook.default_owner_id = v.clone()
                }
                (PlaybookField::DefaultOwnerEnabled, FieldValue::Flag(v)) => {
                    playbook.default_owner_enabled = *v
                }
                (PlaybookField::BroadcastEnabled, FieldValue::Flag(v)) => {
                    playbook.broadcast_enabled = *v
                }
                (PlaybookField::BroadcastChannelIds, FieldValue::List(v)) => {
                    playbook.broadcast_channel_ids = v.clone()
                }
                (PlaybookField::WebhookOnCreationEnabled, FieldValue::Flag(v)) => {
                    playbook.webhook_on_creation_enabled = *v
                }
                (PlaybookField::WebhookOnCreationUrls, FieldValue::List(v)) => {
                    playbook.webhook_on_creation_urls = v.clone()
                }
                (field, value) => {
                    return Err(PlaybookError::Internal(format!(
                        "diff value {:?} does not fit field '{}'",
                        value, field
                    )))
                }
            }
        }
        Ok(())
    }

    fn push(&mut self, field: PlaybookField, old: FieldValue, new: FieldValue) {
        if old != new {
            self.changes.push(FieldChange { field, old, new });
        }
    }
}

/// Compares `update` with `current` and keeps only the fields that would
/// actually change. Fields left as [`Patch::Keep`] never appear.
pub fn diff_playbook(current: &Playbook, update: &PlaybookUpdate) -> PlaybookDiff {
    let mut diff = PlaybookDiff::default();

    if !update.title.is_keep() {
        diff.push(
            PlaybookField::Title,
            FieldValue::Text(current.title.clone()),
            FieldValue::Text(update.title.proposed(&current.title)),
        );
    }

    if !update.description.is_keep() {
        diff.push(
            PlaybookField::Description,
            FieldValue::Text(current.description.clone()),
            FieldValue::Text(update.description.proposed(&current.description)),
        );
    }

    if !update.default_owner_id.is_keep() {
        diff.push(
            PlaybookField::DefaultOwnerId,
            FieldValue::OptionalText(current.default_owner_id.clone()),
            FieldValue::OptionalText(proposed_owner(
                &update.default_owner_id,
                &current.default_owner_id,
            )),
        );
    }

    if !update.default_owner_enabled.is_keep() {
        diff.push(
            PlaybookField::DefaultOwnerEnabled,
            FieldValue::Flag(current.default_owner_enabled),
            FieldValue::Flag(
                update
                    .default_owner_enabled
                    .proposed(&current.default_owner_enabled),
            ),
        );
    }

    if !update.broadcast_enabled.is_keep() {
        diff.push(
            PlaybookField::BroadcastEnabled,
            FieldValue::Flag(current.broadcast_enabled),
            FieldValue::Flag(update.broadcast_enabled.proposed(&current.broadcast_enabled)),
        );
    }

    if !update.broadcast_channel_ids.is_keep() {
        let proposed = update
            .broadcast_channel_ids
            .proposed(&current.broadcast_channel_ids);
        // Membership, not order, decides whether the channel list changed.
        if !same_members(&current.broadcast_channel_ids, &proposed) {
            diff.push(
                PlaybookField::BroadcastChannelIds,
                FieldValue::List(current.broadcast_channel_ids.clone()),
                FieldValue::List(proposed),
            );
        }
    }

    if !update.webhook_on_creation_enabled.is_keep() {
        diff.push(
            PlaybookField::WebhookOnCreationEnabled,
            FieldValue::Flag(current.webhook_on_creation_enabled),
            FieldValue::Flag(
                update
                    .webhook_on_creation_enabled
                    .proposed(&current.webhook_on_creation_enabled),
            ),
        );
    }

    if !update.webhook_on_creation_urls.is_keep() {
        diff.push(
            PlaybookField::WebhookOnCreationUrls,
            FieldValue::List(current.webhook_on_creation_urls.clone()),
            FieldValue::List(
                update
                    .webhook_on_creation_urls
                    .proposed(&current.webhook_on_creation_urls),
            ),
        );
    }

    diff
}

/// An empty owner id means "no owner".
fn proposed_owner(patch: &Patch<String>, current: &Option<String>) -> Option<String> {
    patch
        .proposed_option(current)
        .filter(|owner| !owner.trim().is_empty())
}

fn same_members(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}
