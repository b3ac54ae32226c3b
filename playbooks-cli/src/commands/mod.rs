pub mod metrics;
pub mod playbooks;

pub use metrics::{handle_metrics_command, MetricsCommand};
pub use playbooks::{cmd_import, cmd_list, cmd_show, cmd_update};

use anyhow::{bail, Context, Result};
use playbooks_core::{
    open_pool, Actor, Capability, DynMembershipOracle, HttpMembershipOracle, InMemoryMembership,
    InMemoryPlaybookStore, Metric, MetricType, MutationOrchestrator, PgPlaybookRepository,
    Playbook, PlaybooksConfig,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::load_config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => bail!("Unknown output format '{}'. Use 'text' or 'json'", other),
        }
    }
}

/// Where playbooks are created; the orchestrator only ever updates them.
pub enum Backend {
    Postgres(Arc<PgPlaybookRepository>),
    Memory(Arc<InMemoryPlaybookStore>),
}

impl Backend {
    pub async fn create(&self, playbook: Playbook) -> Result<Playbook> {
        match self {
            Backend::Postgres(repo) => Ok(repo.create(&playbook).await?),
            Backend::Memory(store) => Ok(store.insert(playbook).await),
        }
    }
}

pub struct CommandContext {
    pub actor: Actor,
    pub format: OutputFormat,
    pub orchestrator: MutationOrchestrator,
    pub backend: Backend,
}

impl CommandContext {
    pub async fn build(
        config_path: Option<&Path>,
        user: &str,
        capabilities: &[String],
        format: &str,
        demo: bool,
    ) -> Result<Self> {
        let actor = parse_actor(user, capabilities)?;
        let format = OutputFormat::parse(format)?;

        if demo {
            // Demo runs without any config file; an explicit --config must still load.
            let config = match config_path {
                Some(_) => load_config(config_path)?,
                None => load_config(None).unwrap_or_default(),
            };
            let (store, membership) = demo_collaborators(&actor).await;
            let orchestrator = MutationOrchestrator::new(store.clone(), membership, &config);
            return Ok(Self {
                actor,
                format,
                orchestrator,
                backend: Backend::Memory(store),
            });
        }

        let config = load_config(config_path)?;
        let membership = membership_oracle(&config)?;
        let pool = open_pool(&config.database, false)
            .await
            .context("Failed to connect to database. Run with --demo to use sample data")?;
        let repo = Arc::new(PgPlaybookRepository::new(pool));
        let orchestrator = MutationOrchestrator::new(repo.clone(), membership, &config);

        Ok(Self {
            actor,
            format,
            orchestrator,
            backend: Backend::Postgres(repo),
        })
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

pub fn parse_actor(user: &str, capabilities: &[String]) -> Result<Actor> {
    if user.trim().is_empty() {
        bail!("--user must not be empty");
    }

    let capabilities = capabilities
        .iter()
        .map(|c| c.parse::<Capability>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;

    Ok(Actor::new(user.trim()).with_capabilities(capabilities))
}

fn membership_oracle(config: &PlaybooksConfig) -> Result<DynMembershipOracle> {
    if config.membership.base_url.is_empty() {
        bail!(
            "No membership directory configured. Set membership.base_url or \
             PLAYBOOKS_MEMBERSHIP_URL, or run with --demo"
        );
    }
    Ok(Arc::new(HttpMembershipOracle::new(&config.membership)?))
}

/// A seeded store where the acting user belongs to the demo team and to
/// `town-square`, but not to `leadership`.
async fn demo_collaborators(
    actor: &Actor,
) -> (Arc<InMemoryPlaybookStore>, DynMembershipOracle) {
    let store = Arc::new(InMemoryPlaybookStore::new());
    store
        .insert(
            Playbook::new("demo-team", "Incident response")
                .with_id("demo")
                .with_description("Sample playbook for trying out updates")
                .with_default_owner(actor.user_id.clone())
                .with_broadcast_channels(vec!["town-square".to_string()])
                .with_metric(
                    Metric::new("Time to acknowledge", MetricType::Duration)
                        .with_id("time-to-ack")
                        .with_target(15 * 60 * 1000),
                )
                .with_metric(
                    Metric::new("Customers affected", MetricType::Integer).with_id("customers"),
                ),
        )
        .await;
    store
        .insert(Playbook::new("demo-team", "Customer escalation").with_id("escalation"))
        .await;

    let membership = InMemoryMembership::new();
    for user in [actor.user_id.as_str(), "alice", "bob"] {
        membership.add_team_member("demo-team", user).await;
    }
    membership
        .add_channel_member("town-square", &actor.user_id)
        .await;
    membership.add_channel_member("leadership", "alice").await;

    info!(user_id = %actor.user_id, "Using in-memory demo data");
    let membership: DynMembershipOracle = Arc::new(membership);
    (store, membership)
}

/// Reads a JSON or YAML document; `-` reads JSON from stdin.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if path == Path::new("-") {
        let mut input = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut input)
            .context("Failed to read stdin")?;
        return serde_json::from_str(&input).context("Invalid JSON on stdin");
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display())),
        _ => serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display())),
    }
}
