use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::diff::diff_playbook;
use super::policy::PolicyEvaluator;
use super::validate::StructuralValidator;
use crate::config::{OrchestratorConfig, PlaybooksConfig};
use crate::error::{PlaybookError, PlaybookResult};
use crate::membership::DynMembershipOracle;
use crate::models::{
    Actor, Metric, MetricId, MetricType, MetricUpdate, NewMetric, Playbook, PlaybookField,
    PlaybookId, PlaybookUpdate,
};
use crate::repo::DynPlaybookStore;

/// Where a mutation request currently is. Successful requests walk the
/// stages in declaration order; `Rejected` can follow any stage before
/// `Persisted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStage {
    Received,
    Loaded,
    Diffed,
    Validated,
    Authorized,
    Applied,
    Persisted,
    Rejected,
}

impl MutationStage {
    pub fn next(self) -> Option<MutationStage> {
        match self {
            MutationStage::Received => Some(MutationStage::Loaded),
            MutationStage::Loaded => Some(MutationStage::Diffed),
            MutationStage::Diffed => Some(MutationStage::Validated),
            MutationStage::Validated => Some(MutationStage::Authorized),
            MutationStage::Authorized => Some(MutationStage::Applied),
            MutationStage::Applied => Some(MutationStage::Persisted),
            MutationStage::Persisted | MutationStage::Rejected => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl std::fmt::Display for MutationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MutationStage::Received => "received",
            MutationStage::Loaded => "loaded",
            MutationStage::Diffed => "diffed",
            MutationStage::Validated => "validated",
            MutationStage::Authorized => "authorized",
            MutationStage::Applied => "applied",
            MutationStage::Persisted => "persisted",
            MutationStage::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOutcome {
    pub playbook_id: PlaybookId,
    pub changed_fields: Vec<PlaybookField>,
    /// Version after the request; unchanged for no-op updates.
    pub version: i64,
}

impl UpdateOutcome {
    pub fn is_noop(&self) -> bool {
        self.changed_fields.is_empty()
    }
}

/// Stage bookkeeping and tracing for one request.
struct Mutation {
    operation: &'static str,
    target: String,
    stage: MutationStage,
}

impl Mutation {
    fn new(operation: &'static str, target: impl std::fmt::Display) -> Self {
        let target = target.to_string();
        debug!(operation, target = %target, "Mutation received");
        Self {
            operation,
            target,
            stage: MutationStage::Received,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.stage.next() {
            debug!(
                operation = self.operation,
                target = %self.target,
                from = %self.stage,
                to = %next,
                "Mutation stage"
            );
            self.stage = next;
        }
    }

    fn restart(&mut self, attempt: u32) {
        warn!(
            operation = self.operation,
            target = %self.target,
            attempt,
            "Concurrent modification, reloading"
        );
        self.stage = MutationStage::Received;
    }

    fn reject(&mut self, err: PlaybookError) -> PlaybookError {
        warn!(
            operation = self.operation,
            target = %self.target,
            stage = %self.stage,
            error_code = err.error_code(),
            "Mutation rejected: {}",
            err
        );
        if !err.is_rejection() && !err.is_transient() {
            err.log();
        }
        self.stage = MutationStage::Rejected;
        err
    }
}

/// Runs playbook and metric mutations through diff, validation,
/// authorization and an optimistic-concurrency save.
pub struct MutationOrchestrator {
    store: DynPlaybookStore,
    policy: PolicyEvaluator,
    validator: StructuralValidator,
    config: OrchestratorConfig,
}

impl MutationOrchestrator {
    pub fn new(
        store: DynPlaybookStore,
        membership: DynMembershipOracle,
        config: &PlaybooksConfig,
    ) -> Self {
        Self::from_parts(
            store,
            PolicyEvaluator::new(membership, &config.membership),
            StructuralValidator::new(config.limits.clone()),
            config.orchestrator.clone(),
        )
    }

    pub fn from_parts(
        store: DynPlaybookStore,
        policy: PolicyEvaluator,
        validator: StructuralValidator,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            policy,
            validator,
            config,
        }
    }

    pub async fn update_playbook(
        &self,
        actor: &Actor,
        id: &PlaybookId,
        update: &PlaybookUpdate,
    ) -> PlaybookResult<UpdateOutcome> {
        let mut mutation = Mutation::new("update_playbook", id);
        let mut attempt = 0;
        loop {
            match self.try_update(&mut mutation, actor, id, update).await {
                Err(err) if self.should_retry(&err, attempt) => {
                    attempt += 1;
                    mutation.restart(attempt);
                }
                Err(err) => return Err(mutation.reject(err)),
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    /// Appends a metric to the playbook and returns its identity.
    pub async fn add_metric(
        &self,
        actor: &Actor,
        playbook_id: &PlaybookId,
        input: &NewMetric,
    ) -> PlaybookResult<MetricId> {
        let mut mutation = Mutation::new("add_metric", playbook_id);
        // Generated once so conflict retries reuse the same identity.
        let metric_id = input.id.clone().unwrap_or_else(MetricId::generate);
        let mut attempt = 0;
        loop {
            match self
                .try_add_metric(&mut mutation, actor, playbook_id, &metric_id, input)
                .await
            {
                Err(err) if self.should_retry(&err, attempt) => {
                    attempt += 1;
                    mutation.restart(attempt);
                }
                Err(err) => return Err(mutation.reject(err)),
                Ok(()) => return Ok(metric_id),
            }
        }
    }

    pub async fn update_metric(
        &self,
        actor: &Actor,
        metric_id: &MetricId,
        update: &MetricUpdate,
    ) -> PlaybookResult<()> {
        let mut mutation = Mutation::new("update_metric", metric_id);
        let mut attempt = 0;
        loop {
            match self
                .try_update_metric(&mut mutation, actor, metric_id, update)
                .await
            {
                Err(err) if self.should_retry(&err, attempt) => {
                    attempt += 1;
                    mutation.restart(attempt);
                }
                Err(err) => return Err(mutation.reject(err)),
                Ok(()) => return Ok(()),
            }
        }
    }

    pub async fn delete_metric(&self, actor: &Actor, metric_id: &MetricId) -> PlaybookResult<()> {
        let mut mutation = Mutation::new("delete_metric", metric_id);
        let mut attempt = 0;
        loop {
            match self.try_delete_metric(&mut mutation, actor, metric_id).await {
                Err(err) if self.should_retry(&err, attempt) => {
                    attempt += 1;
                    mutation.restart(attempt);
                }
                Err(err) => return Err(mutation.reject(err)),
                Ok(()) => return Ok(()),
            }
        }
    }

    pub async fn get_playbook(&self, actor: &Actor, id: &PlaybookId) -> PlaybookResult<Playbook> {
        self.policy.authorize_view(actor)?;
        self.load(id).await
    }

    /// Every playbook the actor may view, ordered by title.
    pub async fn list_playbooks(&self, actor: &Actor) -> PlaybookResult<Vec<Playbook>> {
        self.policy.authorize_view(actor)?;
        let mut playbooks = self
            .with_storage_timeout("list playbooks", self.store.list_playbooks())
            .await?;
        playbooks.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(playbooks)
    }

    async fn try_update(
        &self,
        mutation: &mut Mutation,
        actor: &Actor,
        id: &PlaybookId,
        update: &PlaybookUpdate,
    ) -> PlaybookResult<UpdateOutcome> {
        let current = self.load(id).await?;
        mutation.advance();

        let diff = diff_playbook(&current, update);
        mutation.advance();
        if diff.is_empty() {
            debug!(playbook_id = %id, "Update has no effective changes");
            return Ok(UpdateOutcome {
                playbook_id: id.clone(),
                changed_fields: Vec::new(),
                version: current.version,
            });
        }

        let mut candidate = current.clone();
        diff.apply_to(&mut candidate)?;
        self.validator.validate_update(&candidate, &diff)?;
        mutation.advance();

        self.policy.authorize_update(actor, &current, &diff).await?;
        mutation.advance();

        mutation.advance();
        let version = self.save(&candidate).await?;
        mutation.advance();

        let changed_fields = diff.changed_fields();
        info!(
            playbook_id = %id,
            user_id = %actor.user_id,
            fields = ?changed_fields,
            version,
            "Playbook updated"
        );

        Ok(UpdateOutcome {
            playbook_id: id.clone(),
            changed_fields,
            version,
        })
    }

    async fn try_add_metric(
        &self,
        mutation: &mut Mutation,
        actor: &Actor,
        playbook_id: &PlaybookId,
        metric_id: &MetricId,
        input: &NewMetric,
    ) -> PlaybookResult<()> {
        let playbook = self.load(playbook_id).await?;
        mutation.advance();

        if let Some(existing) = playbook.metrics.get(metric_id) {
            mutation.advance();
            if input.id.is_some() && same_content(existing, input) {
                self.policy.authorize_metric_change(actor)?;
                debug!(metric_id = %metric_id, "Metric already present, add is a no-op");
                return Ok(());
            }
            return Err(PlaybookError::invalid_field(
                "id",
                format!("metric '{}' already exists with different content", metric_id),
            ));
        }

        if input.id.is_some() {
            let owner = self
                .with_storage_timeout(
                    "find metric",
                    self.store.find_playbook_id_by_metric(metric_id),
                )
                .await?;
            if let Some(owner) = owner.filter(|owner| owner != playbook_id) {
                return Err(PlaybookError::invalid_field(
                    "id",
                    format!("metric '{}' belongs to playbook '{}'", metric_id, owner),
                ));
            }
        }
        mutation.advance();

        let metric = self
            .validator
            .build_metric(&playbook, metric_id.clone(), input)?;
        mutation.advance();

        self.policy.authorize_metric_change(actor)?;
        mutation.advance();

        let mut candidate = playbook;
        candidate.metrics.push(metric)?;
        mutation.advance();

        let version = self.save(&candidate).await?;
        mutation.advance();

        info!(
            playbook_id = %playbook_id,
            metric_id = %metric_id,
            user_id = %actor.user_id,
            version,
            "Metric added"
        );
        Ok(())
    }

    async fn try_update_metric(
        &self,
        mutation: &mut Mutation,
        actor: &Actor,
        metric_id: &MetricId,
        update: &MetricUpdate,
    ) -> PlaybookResult<()> {
        let playbook = self.load_metric_owner(metric_id).await?;
        mutation.advance();

        let mut candidate = playbook.clone();
        let changed = candidate.metrics.update(metric_id, update)?;
        mutation.advance();
        if !changed {
            debug!(metric_id = %metric_id, "Metric update has no effective changes");
            return Ok(());
        }

        self.validator
            .validate_metric_update(&playbook, metric_id, update)?;
        mutation.advance();

        self.policy.authorize_metric_change(actor)?;
        mutation.advance();

        mutation.advance();
        let version = self.save(&candidate).await?;
        mutation.advance();

        info!(
            playbook_id = %candidate.id,
            metric_id = %metric_id,
            user_id = %actor.user_id,
            version,
            "Metric updated"
        );
        Ok(())
    }

    async fn try_delete_metric(
        &self,
        mutation: &mut Mutation,
        actor: &Actor,
        metric_id: &MetricId,
    ) -> PlaybookResult<()> {
        let mut candidate = self.load_metric_owner(metric_id).await?;
        mutation.advance();
        mutation.advance();
        mutation.advance();

        self.policy.authorize_metric_change(actor)?;
        mutation.advance();

        let removed = candidate.metrics.remove(metric_id)?;
        mutation.advance();

        let version = self.save(&candidate).await?;
        mutation.advance();

        info!(
            playbook_id = %candidate.id,
            metric_id = %metric_id,
            title = %removed.title,
            user_id = %actor.user_id,
            version,
            "Metric deleted"
        );
        Ok(())
    }

    fn should_retry(&self, err: &PlaybookError, attempt: u32) -> bool {
        matches!(err, PlaybookError::Conflict { .. }) && attempt < self.config.max_conflict_retries
    }

    async fn load(&self, id: &PlaybookId) -> PlaybookResult<Playbook> {
        self.with_storage_timeout("load playbook", self.store.load_playbook(id))
            .await?
            .ok_or_else(|| PlaybookError::PlaybookNotFound(id.to_string()))
    }

    /// Loads the playbook holding `metric_id`; missing either way is `MetricNotFound`.
    async fn load_metric_owner(&self, metric_id: &MetricId) -> PlaybookResult<Playbook> {
        let not_found = || PlaybookError::MetricNotFound(metric_id.to_string());

        let playbook_id = self
            .with_storage_timeout(
                "find metric",
                self.store.find_playbook_id_by_metric(metric_id),
            )
            .await?
            .ok_or_else(not_found)?;

        let playbook = self
            .with_storage_timeout("load playbook", self.store.load_playbook(&playbook_id))
            .await?
            .ok_or_else(not_found)?;

        if !playbook.metrics.contains(metric_id) {
            return Err(not_found());
        }
        Ok(playbook)
    }

    async fn save(&self, playbook: &Playbook) -> PlaybookResult<i64> {
        self.with_storage_timeout("save playbook", self.store.save_playbook(playbook))
            .await
    }

    async fn with_storage_timeout<T>(
        &self,
        what: &str,
        fut: impl Future<Output = PlaybookResult<T>>,
    ) -> PlaybookResult<T> {
        let limit: Duration = self.config.storage_timeout();
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            PlaybookError::storage_unavailable(format!("{} timed out after {:?}", what, limit))
        })?
    }
}

fn same_content(existing: &Metric, input: &NewMetric) -> bool {
    existing.title == input.title.trim()
        && existing.description == input.description
        && input.metric_type.parse::<MetricType>().ok() == Some(existing.metric_type)
        && existing.target == input.target
}
