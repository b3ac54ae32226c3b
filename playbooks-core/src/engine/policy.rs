use std::time::Duration;
use tracing::debug;

use super::diff::{FieldValue, PlaybookDiff};
use crate::config::MembershipConfig;
use crate::error::{retry_async_with_config, PlaybookError, PlaybookResult, RetryConfig};
use crate::membership::{DynMembershipOracle, MembershipScope};
use crate::models::{Actor, Capability, Playbook, PlaybookField};

/// A requirement a changed field places on the actor or on the new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// The actor holds a capability implying [`Capability::ManagePlaybook`].
    EditPlaybook,
    /// For every channel in the new list the actor holds
    /// [`Capability::BroadcastToAnyChannel`] or is a channel member.
    BroadcastToChannels,
    /// A non-empty new owner is a member of the playbook's team.
    EligibleOwner,
}

const EDIT: &[FieldRule] = &[FieldRule::EditPlaybook];

/// Rules per field, in evaluation order.
pub static FIELD_RULES: &[(PlaybookField, &[FieldRule])] = &[
    (PlaybookField::Title, EDIT),
    (PlaybookField::Description, EDIT),
    (
        PlaybookField::DefaultOwnerId,
        &[FieldRule::EditPlaybook, FieldRule::EligibleOwner],
    ),
    (PlaybookField::DefaultOwnerEnabled, EDIT),
    (PlaybookField::BroadcastEnabled, EDIT),
    (
        PlaybookField::BroadcastChannelIds,
        &[FieldRule::EditPlaybook, FieldRule::BroadcastToChannels],
    ),
    (PlaybookField::WebhookOnCreationEnabled, EDIT),
    (PlaybookField::WebhookOnCreationUrls, EDIT),
];

pub fn rules_for(field: PlaybookField) -> &'static [FieldRule] {
    FIELD_RULES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, rules)| *rules)
        .unwrap_or(EDIT)
}

/// Every violation found for one request, in table order.
#[derive(Debug, Default)]
pub struct PolicyDecision {
    violations: Vec<PlaybookError>,
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[PlaybookError] {
        &self.violations
    }

    /// The first violation, if any.
    pub fn into_result(self) -> PlaybookResult<()> {
        match self.violations.into_iter().next() {
            Some(violation) => Err(violation),
            None => Ok(()),
        }
    }
}

pub struct PolicyEvaluator {
    membership: DynMembershipOracle,
    timeout: Duration,
    retry: RetryConfig,
}

impl PolicyEvaluator {
    pub fn new(membership: DynMembershipOracle, config: &MembershipConfig) -> Self {
        Self {
            membership,
            timeout: config.timeout(),
            retry: RetryConfig::for_membership(config.retry_attempts),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks the changed fields of `diff` against [`FIELD_RULES`].
    ///
    /// A field's rules stop at its first violation, so membership is only
    /// consulted for fields the actor may edit. Violations are collected
    /// across fields; an `Err` means a membership lookup could not be
    /// answered and nothing had been rejected yet.
    pub async fn evaluate(
        &self,
        actor: &Actor,
        playbook: &Playbook,
        diff: &PlaybookDiff,
    ) -> PlaybookResult<PolicyDecision> {
        let mut decision = PolicyDecision::default();

        for (field, rules) in FIELD_RULES {
            let Some(change) = diff.get(*field) else {
                continue;
            };

            for rule in *rules {
                let checked = match rule {
                    FieldRule::EditPlaybook => Ok(self.check_edit(actor, *field)),
                    FieldRule::BroadcastToChannels => {
                        self.check_broadcast(actor, *field, &change.new).await
                    }
                    FieldRule::EligibleOwner => self.check_owner(playbook, &change.new).await,
                };

                let violation = match checked {
                    Ok(violation) => violation,
                    // The request is rejected either way; report the rejection.
                    Err(err) if !decision.is_allowed() => {
                        debug!(field = %field, error = %err, "Skipping lookup after violation");
                        return Ok(decision);
                    }
                    Err(err) => return Err(err),
                };

                if let Some(violation) = violation {
                    debug!(field = %field, rule = ?rule, "Policy violation");
                    decision.violations.push(violation);
                    break;
                }
            }
        }

        Ok(decision)
    }

    pub async fn authorize_update(
        &self,
        actor: &Actor,
        playbook: &Playbook,
        diff: &PlaybookDiff,
    ) -> PlaybookResult<()> {
        if diff.is_empty() {
            return Ok(());
        }
        self.evaluate(actor, playbook, diff).await?.into_result()
    }

    /// Metric mutations only need edit rights on the owning playbook.
    pub fn authorize_metric_change(&self, actor: &Actor) -> PlaybookResult<()> {
        require(actor, Capability::ManagePlaybook, "metrics")
    }

    pub fn authorize_view(&self, actor: &Actor) -> PlaybookResult<()> {
        require(actor, Capability::ViewPlaybook, "playbook")
    }

    async fn is_member(&self, user_id: &str, scope: MembershipScope) -> PlaybookResult<bool> {
        let membership = &self.membership;
        let scope = &scope;
        let timeout = self.timeout;

        retry_async_with_config(
            || async move {
                tokio::time::timeout(timeout, membership.is_member(user_id, scope))
                    .await
                    .map_err(|_| {
                        PlaybookError::membership_unavailable(format!(
                            "lookup of {} for {} timed out after {:?}",
                            scope, user_id, timeout
                        ))
                    })?
            },
            self.retry.clone(),
        )
        .await
    }

    fn check_edit(&self, actor: &Actor, field: PlaybookField) -> Option<PlaybookError> {
        require(actor, Capability::ManagePlaybook, field.as_str()).err()
    }

    async fn check_broadcast(
        &self,
        actor: &Actor,
        field: PlaybookField,
        new_value: &FieldValue,
    ) -> PlaybookResult<Option<PlaybookError>> {
        if actor.has_capability(Capability::BroadcastToAnyChannel) {
            return Ok(None);
        }

        let FieldValue::List(channels) = new_value else {
            return Ok(None);
        };

        let mut denied: Vec<String> = Vec::new();
        for channel in channels {
            if denied.contains(channel) {
                continue;
            }
            let member = self
                .is_member(&actor.user_id, MembershipScope::Channel(channel.clone()))
                .await?;
            if !member {
                denied.push(channel.clone());
            }
        }

        if denied.is_empty() {
            return Ok(None);
        }

        Ok(Some(PlaybookError::PermissionDenied {
            field: field.as_str().to_string(),
            requirement: format!(
                "{} or membership in every broadcast channel",
                Capability::BroadcastToAnyChannel
            ),
            channels: denied,
        }))
    }

    async fn check_owner(
        &self,
        playbook: &Playbook,
        new_value: &FieldValue,
    ) -> PlaybookResult<Option<PlaybookError>> {
        let FieldValue::OptionalText(Some(owner)) = new_value else {
            return Ok(None);
        };

        let member = self
            .is_member(owner, MembershipScope::Team(playbook.team_id.clone()))
            .await?;

        Ok((!member).then(|| PlaybookError::InvalidOwner {
            owner_id: owner.clone(),
            team_id: playbook.team_id.clone(),
        }))
    }
}

fn require(actor: &Actor, capability: Capability, field: &str) -> PlaybookResult<()> {
    if actor.has_capability(capability) {
        Ok(())
    } else {
        Err(PlaybookError::PermissionDenied {
            field: field.to_string(),
            requirement: capability.to_string(),
            channels: Vec::new(),
        })
    }
}
