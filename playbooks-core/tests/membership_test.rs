use playbooks_core::{
    Actor, Capability, ErrorKind, HttpMembershipOracle, InMemoryPlaybookStore, MembershipConfig,
    MembershipOracle, MembershipScope, MutationOrchestrator, Playbook, PlaybookError, PlaybookId,
    PlaybookStore, PlaybookUpdate, PlaybooksConfig,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> MembershipConfig {
    MembershipConfig {
        base_url: server.uri(),
        token: Some("secret-token".to_string()),
        timeout_ms: 500,
        retry_attempts: 1,
    }
}

mod http_oracle {
    use super::*;

    #[tokio::test]
    async fn test_member_and_non_member() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/channels/c1/members/alice"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"channel_id": "c1", "user_id": "alice"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/channels/c1/members/bob"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let oracle = HttpMembershipOracle::new(&config_for(&server)).unwrap();
        let channel = MembershipScope::Channel("c1".to_string());

        assert!(oracle.is_member("alice", &channel).await.unwrap());
        assert!(!oracle.is_member("bob", &channel).await.unwrap());
    }

    #[tokio::test]
    async fn test_team_lookup_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/teams/team-1/members/alice"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let oracle = HttpMembershipOracle::new(&config_for(&server)).unwrap();
        assert!(oracle
            .is_member("alice", &MembershipScope::Team("team-1".to_string()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reserved_characters_stay_inside_the_channel_segment() {
        let server = MockServer::start().await;
        // Channel metadata answers 200 for anyone who can see the channel.
        Mock::given(method("GET"))
            .and(path("/api/v4/channels/private"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/channels/private/members/editor"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let oracle = HttpMembershipOracle::new(&config_for(&server)).unwrap();

        assert!(!oracle
            .is_member("editor", &MembershipScope::Channel("private".to_string()))
            .await
            .unwrap());
        for crafted in ["private?", "private#", "private/"] {
            assert!(
                !oracle
                    .is_member("editor", &MembershipScope::Channel(crafted.to_string()))
                    .await
                    .unwrap(),
                "{} must not resolve to the channel endpoint",
                crafted
            );
        }

        let requests = server.received_requests().await.unwrap();
        assert!(requests
            .iter()
            .all(|r| r.url.path().ends_with("/members/editor")));
    }

    #[tokio::test]
    async fn test_server_error_is_dependency_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let oracle = HttpMembershipOracle::new(&config_for(&server)).unwrap();
        let err = oracle
            .is_member("alice", &MembershipScope::Channel("c1".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    }

    #[tokio::test]
    async fn test_slow_directory_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let oracle = HttpMembershipOracle::new(&config_for(&server)).unwrap();
        let err = oracle
            .is_member("alice", &MembershipScope::Team("team-1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybookError::DependencyUnavailable { .. }));
    }
}

mod orchestrated {
    use super::*;

    async fn orchestrator_with(server: &MockServer) -> (Arc<InMemoryPlaybookStore>, MutationOrchestrator) {
        let store = Arc::new(InMemoryPlaybookStore::new());
        store
            .insert(
                Playbook::new("team-1", "Incident response")
                    .with_id("pb1")
                    .with_broadcast_channels(vec!["c1".to_string()]),
            )
            .await;

        let mut config = PlaybooksConfig::default();
        config.membership = config_for(server);
        let oracle = Arc::new(HttpMembershipOracle::new(&config.membership).unwrap());

        (
            store.clone(),
            MutationOrchestrator::new(store, oracle, &config),
        )
    }

    #[tokio::test]
    async fn test_unchanged_channels_never_call_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let (_, orchestrator) = orchestrator_with(&server).await;
        let editor = Actor::new("editor").with_capability(Capability::ManagePlaybook);

        let outcome = orchestrator
            .update_playbook(
                &editor,
                &PlaybookId::from("pb1"),
                &PlaybookUpdate::new().broadcast_channels(["c1"]),
            )
            .await
            .unwrap();
        assert!(outcome.is_noop());
    }

    #[tokio::test]
    async fn test_malformed_channel_id_rejected_before_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (store, orchestrator) = orchestrator_with(&server).await;
        let editor = Actor::new("editor").with_capability(Capability::ManagePlaybook);

        let err = orchestrator
            .update_playbook(
                &editor,
                &PlaybookId::from("pb1"),
                &PlaybookUpdate::new().broadcast_channels(["c1", "private?"]),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidField);
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_directory_outage_is_not_a_denial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let (store, orchestrator) = orchestrator_with(&server).await;
        let editor = Actor::new("editor").with_capability(Capability::ManagePlaybook);

        let err = orchestrator
            .update_playbook(
                &editor,
                &PlaybookId::from("pb1"),
                &PlaybookUpdate::new().broadcast_channels(["c1", "c2"]),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
        let stored = store
            .load_playbook(&PlaybookId::from("pb1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.broadcast_channel_ids, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_owner_checked_against_team_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v4/teams/team-1/members/bob"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v4/teams/team-1/members/mallory"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (_, orchestrator) = orchestrator_with(&server).await;
        let admin = Actor::new("root").with_capability(Capability::PlaybookAdmin);
        let id = PlaybookId::from("pb1");

        orchestrator
            .update_playbook(&admin, &id, &PlaybookUpdate::new().default_owner("bob"))
            .await
            .unwrap();

        let err = orchestrator
            .update_playbook(&admin, &id, &PlaybookUpdate::new().default_owner("mallory"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOwner);
    }
}
