use async_trait::async_trait;
use playbooks_core::{
    Actor, Capability, ErrorKind, InMemoryMembership, InMemoryPlaybookStore, MembershipOracle,
    MembershipScope, Metric, MetricId, MetricType, MetricUpdate, MutationOrchestrator, NewMetric,
    Patch, Playbook, PlaybookError, PlaybookField, PlaybookId, PlaybookResult, PlaybookStore,
    PlaybookUpdate, PlaybooksConfig,
};
use std::sync::Arc;
use std::time::Duration;

const TEAM: &str = "team-1";
const PLAYBOOK: &str = "pb1";

struct Harness {
    store: Arc<InMemoryPlaybookStore>,
    membership: Arc<InMemoryMembership>,
    orchestrator: Arc<MutationOrchestrator>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(PlaybooksConfig::default()).await
    }

    async fn with_config(config: PlaybooksConfig) -> Self {
        let store = Arc::new(InMemoryPlaybookStore::new());
        store
            .insert(
                Playbook::new(TEAM, "Incident response")
                    .with_id(PLAYBOOK)
                    .with_description("Steps for outages")
                    .with_default_owner("alice")
                    .with_broadcast_channels(vec!["c1".to_string(), "c2".to_string()])
                    .with_metric(Metric::new("A", MetricType::Duration).with_id("m1")),
            )
            .await;

        let membership = Arc::new(InMemoryMembership::new());
        membership.add_team_member(TEAM, "alice").await;
        membership.add_team_member(TEAM, "bob").await;
        membership.add_channel_member("c1", "editor").await;
        membership.add_channel_member("c2", "editor").await;
        membership.add_channel_member("c3", "editor").await;

        let orchestrator = Arc::new(MutationOrchestrator::new(
            store.clone(),
            membership.clone(),
            &config,
        ));

        Self {
            store,
            membership,
            orchestrator,
        }
    }

    async fn playbook(&self) -> Playbook {
        self.store
            .load_playbook(&PlaybookId::from(PLAYBOOK))
            .await
            .unwrap()
            .unwrap()
    }
}

fn id() -> PlaybookId {
    PlaybookId::from(PLAYBOOK)
}

fn nobody() -> Actor {
    Actor::new("nobody")
}

fn viewer() -> Actor {
    Actor::new("viewer").with_capability(Capability::ViewPlaybook)
}

fn editor() -> Actor {
    Actor::new("editor").with_capability(Capability::ManagePlaybook)
}

fn admin() -> Actor {
    Actor::new("root").with_capability(Capability::PlaybookAdmin)
}

fn metric_titles(playbook: &Playbook) -> Vec<(String, String)> {
    playbook
        .metrics
        .iter()
        .map(|m| (m.id.to_string(), m.title.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Playbook updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_noop_update_succeeds_without_permissions() {
    let h = Harness::new().await;
    let update = PlaybookUpdate::new()
        .title("Incident response")
        .default_owner("alice")
        .broadcast_channels(["c2", "c1"]);

    let outcome = h
        .orchestrator
        .update_playbook(&nobody(), &id(), &update)
        .await
        .unwrap();

    assert!(outcome.is_noop());
    assert_eq!(outcome.version, 1);
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_unchanged_broadcast_list_needs_no_broadcast_rights() {
    let h = Harness::new().await;
    // "outsider" can edit but is not in c1 or c2.
    let outsider = Actor::new("outsider").with_capability(Capability::ManagePlaybook);
    let update = PlaybookUpdate::new()
        .description("unrelatedupdate")
        .broadcast_channels(["c1", "c2"]);

    let outcome = h
        .orchestrator
        .update_playbook(&outsider, &id(), &update)
        .await
        .unwrap();

    assert_eq!(outcome.changed_fields, vec![PlaybookField::Description]);
    assert_eq!(h.playbook().await.description, "unrelatedupdate");
}

#[tokio::test]
async fn test_broadcast_change_requires_membership_and_is_atomic() {
    let h = Harness::new().await;
    let update = PlaybookUpdate::new()
        .description("should not land")
        .broadcast_channels(["c1", "secret"]);

    let err = h
        .orchestrator
        .update_playbook(&editor(), &id(), &update)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    match err {
        PlaybookError::PermissionDenied { field, channels, .. } => {
            assert_eq!(field, "broadcastChannelIDs");
            assert_eq!(channels, vec!["secret".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let stored = h.playbook().await;
    assert_eq!(stored.description, "Steps for outages");
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_broadcast_to_member_channels_and_with_elevated_capability() {
    let h = Harness::new().await;

    h.orchestrator
        .update_playbook(
            &editor(),
            &id(),
            &PlaybookUpdate::new().broadcast_channels(["c1", "c3"]),
        )
        .await
        .unwrap();
    assert_eq!(h.playbook().await.broadcast_channel_ids, vec!["c1", "c3"]);

    let broadcaster = editor().with_capability(Capability::BroadcastToAnyChannel);
    h.orchestrator
        .update_playbook(
            &broadcaster,
            &id(),
            &PlaybookUpdate::new().broadcast_channels(["secret"]),
        )
        .await
        .unwrap();
    assert_eq!(h.playbook().await.broadcast_channel_ids, vec!["secret"]);
}

#[tokio::test]
async fn test_owner_must_be_team_member_even_for_admins() {
    let h = Harness::new().await;

    for actor in [editor(), admin()] {
        let err = h
            .orchestrator
            .update_playbook(&actor, &id(), &PlaybookUpdate::new().default_owner("mallory"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, PlaybookError::InvalidOwner { owner_id, team_id }
                if owner_id == "mallory" && team_id == TEAM),
            "unexpected error: {err}"
        );
    }

    h.orchestrator
        .update_playbook(&editor(), &id(), &PlaybookUpdate::new().default_owner("bob"))
        .await
        .unwrap();
    assert_eq!(h.playbook().await.default_owner_id.as_deref(), Some("bob"));

    // Clearing the owner needs no eligibility check.
    h.orchestrator
        .update_playbook(&editor(), &id(), &PlaybookUpdate::new().clear_default_owner())
        .await
        .unwrap();
    assert_eq!(h.playbook().await.default_owner_id, None);
}

#[tokio::test]
async fn test_removed_team_member_cannot_become_owner() {
    let h = Harness::new().await;
    h.membership
        .remove_member(&MembershipScope::Team(TEAM.to_string()), "bob")
        .await;

    let result = h
        .orchestrator
        .update_playbook(&admin(), &id(), &PlaybookUpdate::new().default_owner("bob"))
        .await;
    assert!(matches!(result, Err(PlaybookError::InvalidOwner { .. })));
}

#[tokio::test]
async fn test_webhook_url_bound() {
    let h = Harness::new().await;
    let urls = |n: usize| -> Vec<String> {
        (0..n)
            .map(|i| format!("https://hooks.example.com/{}", i))
            .collect()
    };

    let err = h
        .orchestrator
        .update_playbook(
            &admin(),
            &id(),
            &PlaybookUpdate::new()
                .webhook_on_creation_enabled(true)
                .webhook_on_creation_urls(urls(65)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlaybookError::LimitExceeded { limit: 64, actual: 65, .. }
    ));
    assert_eq!(h.store.save_count(), 0);

    h.orchestrator
        .update_playbook(
            &admin(),
            &id(),
            &PlaybookUpdate::new()
                .webhook_on_creation_enabled(true)
                .webhook_on_creation_urls(urls(64)),
        )
        .await
        .unwrap();
    assert_eq!(h.playbook().await.webhook_on_creation_urls.len(), 64);
}

#[tokio::test]
async fn test_read_back_reflects_exactly_the_diff() {
    let h = Harness::new().await;
    let before = h.playbook().await;

    let outcome = h
        .orchestrator
        .update_playbook(
            &editor(),
            &id(),
            &PlaybookUpdate::new()
                .title("Major incident")
                .broadcast_enabled(true)
                .default_owner("alice"),
        )
        .await
        .unwrap();
    assert_eq!(
        outcome.changed_fields,
        vec![PlaybookField::Title, PlaybookField::BroadcastEnabled]
    );
    assert_eq!(outcome.version, 2);

    let after = h
        .orchestrator
        .get_playbook(&viewer(), &id())
        .await
        .unwrap();
    assert_eq!(after.title, "Major incident");
    assert!(after.broadcast_enabled);

    let mut expected = before.clone();
    expected.title = after.title.clone();
    expected.broadcast_enabled = true;
    expected.version = after.version;
    expected.updated_at = after.updated_at;
    assert_eq!(after, expected);
}

#[tokio::test]
async fn test_missing_playbook_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .orchestrator
        .update_playbook(
            &admin(),
            &PlaybookId::from("nope"),
            &PlaybookUpdate::new().title("x"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybookError::PlaybookNotFound(id) if id == "nope"));
}

#[tokio::test]
async fn test_missing_edit_capability_names_the_field() {
    let h = Harness::new().await;
    let err = h
        .orchestrator
        .update_playbook(&viewer(), &id(), &PlaybookUpdate::new().description("new"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PlaybookError::PermissionDenied { field, .. } if field == "description"
    ));
}

// ---------------------------------------------------------------------------
// Concurrency and dependencies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_conflict_retry_converges() {
    let h = Harness::new().await;
    h.store.simulate_concurrent_writes(1);

    let outcome = h
        .orchestrator
        .update_playbook(&editor(), &id(), &PlaybookUpdate::new().title("Retried"))
        .await
        .unwrap();

    assert_eq!(outcome.version, 3);
    assert_eq!(h.playbook().await.title, "Retried");
    assert_eq!(h.store.save_count(), 1);
}

#[tokio::test]
async fn test_conflict_retries_exhaust() {
    let h = Harness::new().await;
    // One initial attempt plus three retries.
    h.store.simulate_concurrent_writes(4);

    let err = h
        .orchestrator
        .update_playbook(&editor(), &id(), &PlaybookUpdate::new().title("Never"))
        .await
        .unwrap_err();

    assert!(matches!(err, PlaybookError::Conflict { .. }));
    assert!(err.is_transient());
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_concurrent_updates_both_land() {
    let h = Harness::new().await;

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .update_playbook(&editor(), &id(), &PlaybookUpdate::new().title("Concurrent"))
                .await
        })
    };
    let second = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .update_playbook(
                    &editor(),
                    &id(),
                    &PlaybookUpdate::new().description("Also concurrent"),
                )
                .await
        })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let stored = h.playbook().await;
    assert_eq!(stored.title, "Concurrent");
    assert_eq!(stored.description, "Also concurrent");
    assert_eq!(stored.version, 3);
}

struct SlowOracle;

#[async_trait]
impl MembershipOracle for SlowOracle {
    fn name(&self) -> &str {
        "slow"
    }

    async fn is_member(&self, _user_id: &str, _scope: &MembershipScope) -> PlaybookResult<bool> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(true)
    }
}

#[tokio::test(start_paused = true)]
async fn test_membership_timeout_is_dependency_unavailable() {
    let store = Arc::new(InMemoryPlaybookStore::new());
    store
        .insert(Playbook::new(TEAM, "P").with_id(PLAYBOOK))
        .await;
    let orchestrator =
        MutationOrchestrator::new(store.clone(), Arc::new(SlowOracle), &PlaybooksConfig::default());

    let err = orchestrator
        .update_playbook(&admin(), &id(), &PlaybookUpdate::new().default_owner("alice"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    assert_eq!(store.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_storage_timeout_is_dependency_unavailable() {
    let h = Harness::new().await;
    h.store.set_latency(Duration::from_secs(30));

    let err = h
        .orchestrator
        .update_playbook(&editor(), &id(), &PlaybookUpdate::new().title("Slow"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PlaybookError::DependencyUnavailable { ref dependency, .. } if dependency == "playbook storage"
    ));
}

struct DownOracle;

#[async_trait]
impl MembershipOracle for DownOracle {
    fn name(&self) -> &str {
        "down"
    }

    async fn is_member(&self, _user_id: &str, _scope: &MembershipScope) -> PlaybookResult<bool> {
        Err(PlaybookError::membership_unavailable("down"))
    }
}

#[tokio::test]
async fn test_directory_outage_does_not_mask_missing_edit_right() {
    let store = Arc::new(InMemoryPlaybookStore::new());
    store
        .insert(
            Playbook::new(TEAM, "P")
                .with_id(PLAYBOOK)
                .with_broadcast_channels(vec!["c1".to_string()]),
        )
        .await;
    let orchestrator =
        MutationOrchestrator::new(store.clone(), Arc::new(DownOracle), &PlaybooksConfig::default());

    let err = orchestrator
        .update_playbook(
            &nobody(),
            &id(),
            &PlaybookUpdate::new().title("X").broadcast_channels(["c9"]),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(&err, PlaybookError::PermissionDenied { field, .. } if field == "title"),
        "unexpected error: {err}"
    );
    assert_eq!(store.save_count(), 0);
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_add_then_delete_first_metric() {
    let h = Harness::new().await;

    let m2 = h
        .orchestrator
        .add_metric(&editor(), &id(), &NewMetric::new("B", "metric_integer").with_id("m2"))
        .await
        .unwrap();
    assert_eq!(m2, MetricId::from("m2"));
    assert_eq!(
        metric_titles(&h.playbook().await),
        vec![
            ("m1".to_string(), "A".to_string()),
            ("m2".to_string(), "B".to_string())
        ]
    );

    h.orchestrator
        .delete_metric(&editor(), &MetricId::from("m1"))
        .await
        .unwrap();
    let playbook = h.playbook().await;
    assert_eq!(
        metric_titles(&playbook),
        vec![("m2".to_string(), "B".to_string())]
    );
    assert_eq!(playbook.metrics.position(&m2), Some(0));
}

#[tokio::test]
async fn test_add_without_id_generates_distinct_identities() {
    let h = Harness::new().await;
    let first = h
        .orchestrator
        .add_metric(&editor(), &id(), &NewMetric::new("B", "duration"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .add_metric(&editor(), &id(), &NewMetric::new("C", "duration"))
        .await
        .unwrap();

    assert_ne!(first, second);
    let ids: Vec<MetricId> = h.playbook().await.metrics.ids().cloned().collect();
    assert_eq!(ids, vec![MetricId::from("m1"), first, second]);
}

#[tokio::test]
async fn test_add_with_client_id_is_idempotent() {
    let h = Harness::new().await;
    let input = NewMetric::new("Cost", "metric_currency")
        .with_id("cost")
        .with_target(500);

    let a = h.orchestrator.add_metric(&editor(), &id(), &input).await.unwrap();
    let b = h.orchestrator.add_metric(&editor(), &id(), &input).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(h.playbook().await.metrics.len(), 2);
    assert_eq!(h.store.save_count(), 1);

    let err = h
        .orchestrator
        .add_metric(&editor(), &id(), &input.clone().with_target(1))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybookError::InvalidField { field, .. } if field == "id"));
}

#[tokio::test]
async fn test_add_retry_after_conflict_does_not_duplicate() {
    let h = Harness::new().await;
    h.store.simulate_concurrent_writes(2);

    let metric_id = h
        .orchestrator
        .add_metric(&editor(), &id(), &NewMetric::new("B", "metric_integer"))
        .await
        .unwrap();

    let playbook = h.playbook().await;
    assert_eq!(playbook.metrics.len(), 2);
    assert!(playbook.metrics.contains(&metric_id));
}

#[tokio::test]
async fn test_add_metric_rejections() {
    let h = Harness::new().await;

    let err = h
        .orchestrator
        .add_metric(&editor(), &id(), &NewMetric::new("B", "metric_percentage"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybookError::InvalidMetricType(t) if t == "metric_percentage"));

    let err = h
        .orchestrator
        .add_metric(&editor(), &id(), &NewMetric::new("a", "metric_integer"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidField);

    let err = h
        .orchestrator
        .add_metric(&viewer(), &id(), &NewMetric::new("B", "metric_integer"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    let err = h
        .orchestrator
        .add_metric(
            &editor(),
            &PlaybookId::from("nope"),
            &NewMetric::new("B", "metric_integer"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybookError::PlaybookNotFound(_)));

    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_metric_limit_applies_to_admins() {
    let h = Harness::new().await;
    for title in ["B", "C", "D"] {
        h.orchestrator
            .add_metric(&admin(), &id(), &NewMetric::new(title, "metric_integer"))
            .await
            .unwrap();
    }

    let err = h
        .orchestrator
        .add_metric(&admin(), &id(), &NewMetric::new("E", "metric_integer"))
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybookError::LimitExceeded { limit: 4, .. }));
}

#[tokio::test]
async fn test_update_metric_keeps_position() {
    let h = Harness::new().await;
    h.orchestrator
        .add_metric(&editor(), &id(), &NewMetric::new("B", "metric_integer").with_id("m2"))
        .await
        .unwrap();

    let update = MetricUpdate {
        title: Patch::Set("A renamed".to_string()),
        target: Patch::Set(60_000),
        ..Default::default()
    };
    h.orchestrator
        .update_metric(&editor(), &MetricId::from("m1"), &update)
        .await
        .unwrap();

    let playbook = h.playbook().await;
    assert_eq!(
        metric_titles(&playbook),
        vec![
            ("m1".to_string(), "A renamed".to_string()),
            ("m2".to_string(), "B".to_string())
        ]
    );
    let m1 = playbook.metrics.get(&MetricId::from("m1")).unwrap();
    assert_eq!(m1.target, Some(60_000));
    assert_eq!(m1.metric_type, MetricType::Duration);
}

#[tokio::test]
async fn test_noop_metric_update_skips_authorization() {
    let h = Harness::new().await;
    let update = MetricUpdate {
        title: Patch::Set("A".to_string()),
        ..Default::default()
    };
    h.orchestrator
        .update_metric(&nobody(), &MetricId::from("m1"), &update)
        .await
        .unwrap();
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_metric_changes_require_edit_rights() {
    let h = Harness::new().await;
    let before = metric_titles(&h.playbook().await);
    let rename = MetricUpdate {
        title: Patch::Set("Hijacked".to_string()),
        ..Default::default()
    };

    for actor in [viewer(), nobody()] {
        let err = h
            .orchestrator
            .update_metric(&actor, &MetricId::from("m1"), &rename)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied, "{}", actor.user_id);

        let err = h
            .orchestrator
            .delete_metric(&actor, &MetricId::from("m1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied, "{}", actor.user_id);
    }

    assert_eq!(h.store.save_count(), 0);
    assert_eq!(metric_titles(&h.playbook().await), before);
}

#[tokio::test]
async fn test_metric_title_is_stored_trimmed() {
    let h = Harness::new().await;
    let update = MetricUpdate {
        title: Patch::Set("  Renamed  ".to_string()),
        ..Default::default()
    };
    h.orchestrator
        .update_metric(&editor(), &MetricId::from("m1"), &update)
        .await
        .unwrap();

    assert_eq!(
        metric_titles(&h.playbook().await),
        vec![("m1".to_string(), "Renamed".to_string())]
    );
}

#[tokio::test]
async fn test_unknown_metric_is_not_found() {
    let h = Harness::new().await;
    let missing = MetricId::from("m404");

    let err = h
        .orchestrator
        .update_metric(&editor(), &missing, &MetricUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlaybookError::MetricNotFound(ref m) if m == "m404"));

    let err = h
        .orchestrator
        .delete_metric(&editor(), &missing)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_playbooks_sorted_by_title() {
    let h = Harness::new().await;
    h.store
        .insert(Playbook::new(TEAM, "Alpha drill").with_id("pb0"))
        .await;
    h.store
        .insert(Playbook::new(TEAM, "zebra review").with_id("pb2"))
        .await;

    let titles: Vec<String> = h
        .orchestrator
        .list_playbooks(&viewer())
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.title)
        .collect();
    assert_eq!(
        titles,
        vec!["Alpha drill", "Incident response", "zebra review"]
    );

    assert!(matches!(
        h.orchestrator.list_playbooks(&nobody()).await,
        Err(PlaybookError::PermissionDenied { .. })
    ));
}

#[tokio::test]
async fn test_get_missing_playbook() {
    let h = Harness::new().await;
    let err = h
        .orchestrator
        .get_playbook(&viewer(), &PlaybookId::from("ghost"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
