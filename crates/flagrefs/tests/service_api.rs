//! Service-client behavior against a mock HTTP server: upsert semantics,
//! branch submission outcomes, pruning, and retry handling.

use flagrefs::service::{stale_branches, ApiClient, ApiOptions};
use flagrefs::types::{BranchRep, RepoParams};
use flagrefs::ScanError;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn client(server: &MockServer) -> ApiClient {
    ApiClient::new(ApiOptions {
        access_token: "api-x".into(),
        base_uri: server.uri(),
        proj_key: "default".into(),
        user_agent: "FlagRefs/test".into(),
        retry_max: 0,
    })
    .unwrap()
}

fn retrying_client(server: &MockServer, retry_max: u32) -> ApiClient {
    ApiClient::new(ApiOptions {
        access_token: "api-x".into(),
        base_uri: server.uri(),
        proj_key: "default".into(),
        user_agent: "FlagRefs/test".into(),
        retry_max,
    })
    .unwrap()
}

fn repo_params() -> RepoParams {
    RepoParams {
        repo_type: "custom".into(),
        name: "test".into(),
        url: Some("https://example.org/repo".into()),
        commit_url_template: None,
        hunk_url_template: None,
        default_branch: "main".into(),
    }
}

fn branch_rep(update_sequence_id: Option<i64>) -> BranchRep {
    BranchRep {
        name: "feature/scan".into(),
        head: "abc123".into(),
        update_sequence_id,
        sync_time: 1_700_000_000_000,
        references: vec![],
    }
}

#[tokio::test]
async fn fetches_flag_keys_for_the_project() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/flags/default"))
        .and(query_param("summary", "true"))
        .and(header("Authorization", "api-x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"key": "flag-one"}, {"key": "flag-two"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let flags = client(&server).get_flag_keys().await.unwrap();
    assert_eq!(flags, vec!["flag-one".to_string(), "flag-two".to_string()]);
}

#[tokio::test]
async fn upsert_creates_missing_repository() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/code-refs/repositories"))
        .and(body_json(serde_json::json!({
            "type": "custom",
            "name": "test",
            "sourceLink": "https://example.org/repo",
            "defaultBranch": "main"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .maybe_upsert_repository(&repo_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn upsert_tolerates_conflict_on_create() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/code-refs/repositories"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    client(&server)
        .maybe_upsert_repository(&repo_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn upsert_patches_drifted_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "custom",
            "name": "test",
            "sourceLink": "https://old.example.org/repo",
            "defaultBranch": "master"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v2/code-refs/repositories/test"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .maybe_upsert_repository(&repo_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn upsert_leaves_matching_metadata_alone() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "type": "custom",
            "name": "test",
            "sourceLink": "https://example.org/repo",
            "defaultBranch": "main"
        })))
        .mount(&server)
        .await;
    // No POST or PATCH mocks: any write would 404 the mock server and fail.

    client(&server)
        .maybe_upsert_repository(&repo_params())
        .await
        .unwrap();
}

#[tokio::test]
async fn put_branch_escapes_the_branch_name() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/v2/code-refs/repositories/test/branches/feature%2Fscan"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .put_branch("test", &branch_rep(None))
        .await
        .unwrap();
}

#[tokio::test]
async fn put_branch_conflict_maps_to_update_sequence_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = client(&server)
        .put_branch("test", &branch_rep(Some(5)))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::UpdateSequenceConflict));
}

#[tokio::test]
async fn put_branch_413_maps_to_entity_too_large() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(413))
        .mount(&server)
        .await;

    let err = client(&server)
        .put_branch("test", &branch_rep(None))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::EntityTooLarge));
    assert!(err.to_string().contains(".ldignore"));
}

#[tokio::test]
async fn put_branch_other_4xx_is_a_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let err = client(&server)
        .put_branch("test", &branch_rep(None))
        .await
        .unwrap_err();
    match err {
        ScanError::ServiceClient { status, .. } => assert_eq!(status, 401),
        other => panic!("expected ServiceClient, got {:?}", other),
    }
}

#[tokio::test]
async fn transient_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test/branches"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test/branches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"name": "main"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let branches = retrying_client(&server, 3)
        .get_branch_names("test")
        .await
        .unwrap();
    assert_eq!(branches, vec!["main".to_string()]);
}

#[tokio::test]
async fn exhausted_retries_surface_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test/branches"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = retrying_client(&server, 1)
        .get_branch_names("test")
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn stale_branches_are_submitted_for_pruning() {
    // The service knows three branches; the remote only has two. Exactly one
    // delete task should go out, naming the third.
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v2/code-refs/repositories/test/branches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"name": "main"}, {"name": "feature-a"}, {"name": "feature-b"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/code-refs/repositories/test/branch-delete-tasks"))
        .and(body_json(serde_json::json!({"branches": ["feature-b"]})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let api = client(&server);
    let known = api.get_branch_names("test").await.unwrap();
    let remote: std::collections::HashSet<String> =
        ["main".to_string(), "feature-a".to_string()].into_iter().collect();
    let stale = stale_branches(&known, &remote);
    assert_eq!(stale, vec!["feature-b".to_string()]);
    api.post_delete_branches_task("test", &stale).await.unwrap();
}

#[tokio::test]
async fn branch_report_payload_carries_the_wire_fields() {
    let server = MockServer::start().await;
    let received: std::sync::Arc<std::sync::Mutex<Option<serde_json::Value>>> =
        Default::default();
    let received_clone = received.clone();
    Mock::given(method("PUT"))
        .respond_with(move |req: &Request| {
            *received_clone.lock().unwrap() =
                Some(serde_json::from_slice(&req.body).unwrap());
            ResponseTemplate::new(200)
        })
        .mount(&server)
        .await;

    client(&server)
        .put_branch("test", &branch_rep(Some(25)))
        .await
        .unwrap();

    let body = received.lock().unwrap().take().unwrap();
    assert_eq!(body["name"], "feature/scan");
    assert_eq!(body["head"], "abc123");
    assert_eq!(body["updateSequenceId"], 25);
    assert_eq!(body["syncTime"], 1_700_000_000_000i64);
    assert!(body["references"].as_array().unwrap().is_empty());
}
