//! Team and channel membership lookups.
//!
//! The engine only asks yes/no membership questions; the directory behind them
//! is an external service. [`InMemoryMembership`] backs tests and demos,
//! [`HttpMembershipOracle`] talks to a Mattermost-style REST directory.

mod http;

pub use http::HttpMembershipOracle;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::PlaybookResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MembershipScope {
    Channel(String),
    Team(String),
}

impl MembershipScope {
    pub fn id(&self) -> &str {
        match self {
            MembershipScope::Channel(id) | MembershipScope::Team(id) => id,
        }
    }
}

impl std::fmt::Display for MembershipScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MembershipScope::Channel(id) => write!(f, "channel:{}", id),
            MembershipScope::Team(id) => write!(f, "team:{}", id),
        }
    }
}

#[async_trait]
pub trait MembershipOracle: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(false)` means "not a member"; transport failures must be errors.
    async fn is_member(&self, user_id: &str, scope: &MembershipScope) -> PlaybookResult<bool>;
}

pub type DynMembershipOracle = Arc<dyn MembershipOracle>;

#[derive(Default)]
pub struct InMemoryMembership {
    members: RwLock<HashMap<MembershipScope, HashSet<String>>>,
}

impl InMemoryMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_team_member(&self, team_id: &str, user_id: &str) {
        self.add(MembershipScope::Team(team_id.to_string()), user_id)
            .await;
    }

    pub async fn add_channel_member(&self, channel_id: &str, user_id: &str) {
        self.add(MembershipScope::Channel(channel_id.to_string()), user_id)
            .await;
    }

    pub async fn remove_member(&self, scope: &MembershipScope, user_id: &str) -> bool {
        let mut members = self.members.write().await;
        members
            .get_mut(scope)
            .map(|users| users.remove(user_id))
            .unwrap_or(false)
    }

    async fn add(&self, scope: MembershipScope, user_id: &str) {
        let mut members = self.members.write().await;
        members
            .entry(scope)
            .or_insert_with(HashSet::new)
            .insert(user_id.to_string());
    }
}

#[async_trait]
impl MembershipOracle for InMemoryMembership {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn is_member(&self, user_id: &str, scope: &MembershipScope) -> PlaybookResult<bool> {
        let members = self.members.read().await;
        Ok(members
            .get(scope)
            .map(|users| users.contains(user_id))
            .unwrap_or(false))
    }
}
