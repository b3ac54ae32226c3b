use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::patch::Patch;
use crate::metrics::MetricCollection;
use crate::models::Metric;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybookId(String);

impl PlaybookId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlaybookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlaybookId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PlaybookId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playbook {
    pub id: PlaybookId,
    pub team_id: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "defaultOwnerID")]
    pub default_owner_id: Option<String>,
    pub default_owner_enabled: bool,
    pub broadcast_enabled: bool,
    #[serde(rename = "broadcastChannelIDs")]
    pub broadcast_channel_ids: Vec<String>,
    pub webhook_on_creation_enabled: bool,
    #[serde(rename = "webhookOnCreationURLs")]
    pub webhook_on_creation_urls: Vec<String>,
    pub metrics: MetricCollection,
    /// Bumped on every successful save; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Playbook {
    pub fn new(team_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PlaybookId::generate(),
            team_id: team_id.into(),
            title: title.into(),
            description: String::new(),
            default_owner_id: None,
            default_owner_enabled: false,
            broadcast_enabled: false,
            broadcast_channel_ids: Vec::new(),
            webhook_on_creation_enabled: false,
            webhook_on_creation_urls: Vec::new(),
            metrics: MetricCollection::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<PlaybookId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.default_owner_id = Some(owner_id.into());
        self
    }

    pub fn with_broadcast_channels(mut self, channel_ids: Vec<String>) -> Self {
        self.broadcast_channel_ids = channel_ids;
        self
    }

    pub fn with_webhooks(mut self, enabled: bool, urls: Vec<String>) -> Self {
        self.webhook_on_creation_enabled = enabled;
        self.webhook_on_creation_urls = urls;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        // Builder input comes from trusted fixtures; a duplicate id keeps the first.
        let _ = self.metrics.push(metric);
        self
    }
}

/// Every playbook field a [`PlaybookUpdate`] can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookField {
    Title,
    Description,
    DefaultOwnerId,
    DefaultOwnerEnabled,
    BroadcastEnabled,
    BroadcastChannelIds,
    WebhookOnCreationEnabled,
    WebhookOnCreationUrls,
}

impl PlaybookField {
    pub const ALL: [PlaybookField; 8] = [
        PlaybookField::Title,
        PlaybookField::Description,
        PlaybookField::DefaultOwnerId,
        PlaybookField::DefaultOwnerEnabled,
        PlaybookField::BroadcastEnabled,
        PlaybookField::BroadcastChannelIds,
        PlaybookField::WebhookOnCreationEnabled,
        PlaybookField::WebhookOnCreationUrls,
    ];

    /// The API name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybookField::Title => "title",
            PlaybookField::Description => "description",
            PlaybookField::DefaultOwnerId => "defaultOwnerID",
            PlaybookField::DefaultOwnerEnabled => "defaultOwnerEnabled",
            PlaybookField::BroadcastEnabled => "broadcastEnabled",
            PlaybookField::BroadcastChannelIds => "broadcastChannelIDs",
            PlaybookField::WebhookOnCreationEnabled => "webhookOnCreationEnabled",
            PlaybookField::WebhookOnCreationUrls => "webhookOnCreationURLs",
        }
    }
}

impl std::fmt::Display for PlaybookField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sparse update for a playbook. Every field defaults to [`Patch::Keep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlaybookUpdate {
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub title: Patch<String>,

    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub description: Patch<String>,

    #[serde(
        default,
        rename = "defaultOwnerID",
        skip_serializing_if = "Patch::is_keep"
    )]
    pub default_owner_id: Patch<String>,

    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub default_owner_enabled: Patch<bool>,

    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub broadcast_enabled: Patch<bool>,

    #[serde(
        default,
        rename = "broadcastChannelIDs",
        skip_serializing_if = "Patch::is_keep"
    )]
    pub broadcast_channel_ids: Patch<Vec<String>>,

    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub webhook_on_creation_enabled: Patch<bool>,

    #[serde(
        default,
        rename = "webhookOnCreationURLs",
        skip_serializing_if = "Patch::is_keep"
    )]
    pub webhook_on_creation_urls: Patch<Vec<String>>,
}

impl PlaybookUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Patch::Set(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Patch::Set(description.into());
        self
    }

    pub fn default_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.default_owner_id = Patch::Set(owner_id.into());
        self
    }

    pub fn clear_default_owner(mut self) -> Self {
        self.default_owner_id = Patch::Clear;
        self
    }

    pub fn broadcast_enabled(mut self, enabled: bool) -> Self {
        self.broadcast_enabled = Patch::Set(enabled);
        self
    }

    pub fn broadcast_channels<I, S>(mut self, channel_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broadcast_channel_ids =
            Patch::Set(channel_ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn webhook_on_creation_enabled(mut self, enabled: bool) -> Self {
        self.webhook_on_creation_enabled = Patch::Set(enabled);
        self
    }

    pub fn webhook_on_creation_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.webhook_on_creation_urls = Patch::Set(urls.into_iter().map(Into::into).collect());
        self
    }

    /// Fields the request mentions at all, whether or not they would change.
    pub fn requested_fields(&self) -> Vec<PlaybookField> {
        PlaybookField::ALL
            .into_iter()
            .filter(|field| !self.is_keep(*field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.requested_fields().is_empty()
    }

    fn is_keep(&self, field: PlaybookField) -> bool {
        match field {
            PlaybookField::Title => self.title.is_keep(),
            PlaybookField::Description => self.description.is_keep(),
            PlaybookField::DefaultOwnerId => self.default_owner_id.is_keep(),
            PlaybookField::DefaultOwnerEnabled => self.default_owner_enabled.is_keep(),
            PlaybookField::BroadcastEnabled => self.broadcast_enabled.is_keep(),
            PlaybookField::BroadcastChannelIds => self.broadcast_channel_ids.is_keep(),
            PlaybookField::WebhookOnCreationEnabled => self.webhook_on_creation_enabled.is_keep(),
            PlaybookField::WebhookOnCreationUrls => self.webhook_on_creation_urls.is_keep(),
        }
    }
}
