use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Capabilities resolved for an actor by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// System-level playbook administration; implies every other capability.
    PlaybookAdmin,
    /// Edit playbook fields and metrics.
    ManagePlaybook,
    /// Broadcast to any channel without being a member of it.
    BroadcastToAnyChannel,
    ViewPlaybook,
}

impl Capability {
    pub fn implies(&self, other: &Capability) -> bool {
        match self {
            Capability::PlaybookAdmin => true,
            Capability::ManagePlaybook => {
                matches!(other, Capability::ManagePlaybook | Capability::ViewPlaybook)
            }
            _ => self == other,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::PlaybookAdmin => write!(f, "playbook_admin"),
            Capability::ManagePlaybook => write!(f, "manage_playbook"),
            Capability::BroadcastToAnyChannel => write!(f, "broadcast_to_any_channel"),
            Capability::ViewPlaybook => write!(f, "view_playbook"),
        }
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "playbook_admin" | "admin" => Ok(Capability::PlaybookAdmin),
            "manage_playbook" | "manage" => Ok(Capability::ManagePlaybook),
            "broadcast_to_any_channel" | "broadcast" => Ok(Capability::BroadcastToAnyChannel),
            "view_playbook" | "view" => Ok(Capability::ViewPlaybook),
            other => Err(format!("unknown capability '{}'", other)),
        }
    }
}

/// An already-authenticated caller. The engine never re-checks identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub capabilities: HashSet<Capability>,
}

impl Actor {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            capabilities: HashSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities
            .iter()
            .any(|granted| granted.implies(&capability))
    }
}
