//! Registry client and trusted-registry client against an in-process fake registry.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use builder_core::config::{RegistryConfig, RegistryCredential};
use builder_core::models::ImageRef;
use builder_core::{BuilderError, RegistryApi, TrustedRegistry};
use builder_infrastructure::{RegistryClient, TrustedRegistryClient};
use serde_json::{json, Value};

const TOKEN: &str = "test-token";

#[derive(Clone)]
struct FakeRegistry {
    base: String,
    require_token: bool,
    delete_enabled: bool,
    tags: Arc<Mutex<HashMap<String, Vec<String>>>>,
    delete_calls: Arc<AtomicUsize>,
    token_requests: Arc<AtomicUsize>,
    repositories: Arc<Mutex<HashSet<String>>>,
    created: Arc<Mutex<Vec<Value>>>,
}

fn digest(repo: &str, tag: &str) -> String {
    format!("sha256:{}-{tag}", repo.replace('/', "_"))
}

async fn ping() -> StatusCode {
    StatusCode::OK
}

async fn token(State(state): State<FakeRegistry>, headers: HeaderMap) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    if headers.get(AUTHORIZATION).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "token": TOKEN })).into_response()
}

async fn v2(
    State(state): State<FakeRegistry>,
    method: Method,
    headers: HeaderMap,
    Path(rest): Path<String>,
) -> Response {
    let authorized = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false);
    if state.require_token && !authorized {
        let challenge = format!(r#"Bearer realm="{}/token",service="fake""#, state.base);
        return (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, challenge)]).into_response();
    }

    if let Some(repo) = rest.strip_suffix("/tags/list") {
        return match state.tags.lock().unwrap().get(repo) {
            Some(tags) => Json(json!({ "name": repo, "tags": tags })).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({ "errors": [{ "code": "NAME_UNKNOWN" }] })),
            )
                .into_response(),
        };
    }

    let Some((repo, reference)) = rest.split_once("/manifests/") else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if method == Method::DELETE {
        state.delete_calls.fetch_add(1, Ordering::SeqCst);
        if !state.delete_enabled {
            return (
                StatusCode::METHOD_NOT_ALLOWED,
                Json(json!({ "errors": [{ "code": "UNSUPPORTED" }] })),
            )
                .into_response();
        }
        let mut tags = state.tags.lock().unwrap();
        if let Some(list) = tags.get_mut(repo) {
            list.retain(|tag| digest(repo, tag) != reference);
        }
        return StatusCode::ACCEPTED.into_response();
    }

    let exists = state
        .tags
        .lock()
        .unwrap()
        .get(repo)
        .map(|tags| tags.iter().any(|t| t == reference))
        .unwrap_or(false);
    if exists {
        (
            StatusCode::OK,
            [("Docker-Content-Digest", digest(repo, reference))],
        )
            .into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn get_repository(
    State(state): State<FakeRegistry>,
    Path((namespace, name)): Path<(String, String)>,
) -> StatusCode {
    if state
        .repositories
        .lock()
        .unwrap()
        .contains(&format!("{namespace}/{name}"))
    {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn create_repository(
    State(state): State<FakeRegistry>,
    Path(namespace): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    let name = body["name"].as_str().unwrap_or_default().to_string();
    let inserted = state
        .repositories
        .lock()
        .unwrap()
        .insert(format!("{namespace}/{name}"));
    state.created.lock().unwrap().push(body);
    if inserted {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_REQUEST
    }
}

async fn start(require_token: bool, delete_enabled: bool) -> (FakeRegistry, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = FakeRegistry {
        base: format!("http://{addr}"),
        require_token,
        delete_enabled,
        tags: Arc::default(),
        delete_calls: Arc::default(),
        token_requests: Arc::default(),
        repositories: Arc::default(),
        created: Arc::default(),
    };
    let app = Router::new()
        .route("/v2/", get(ping))
        .route("/v2/{*rest}", any(v2))
        .route("/token", get(token))
        .route("/api/v0/repositories/{namespace}/{name}", get(get_repository))
        .route("/api/v0/repositories/{namespace}", post(create_repository))
        .with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (state, addr)
}

fn client(addr: SocketAddr) -> RegistryClient {
    let config = RegistryConfig {
        domain: addr.to_string(),
        user: "admin".to_string(),
        pass: "secret".to_string(),
        request_timeout_seconds: 5,
        ..Default::default()
    };
    RegistryClient::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_tags_and_digest_over_plain_http() {
    let (state, addr) = start(false, true).await;
    state
        .tags
        .lock()
        .unwrap()
        .insert("component-1".to_string(), vec!["v1".to_string(), "v2".to_string()]);
    let client = client(addr);

    assert_eq!(client.tags("component-1").await.unwrap(), vec!["v1", "v2"]);
    assert!(client.tags("missing").await.unwrap().is_empty());
    assert_eq!(
        client.manifest_digest_v2("component-1", "v2").await.unwrap(),
        digest("component-1", "v2")
    );
    assert!(matches!(
        client.manifest_digest_v2("component-1", "v9").await,
        Err(BuilderError::ImageNotFound(_))
    ));

    client
        .delete_manifest("component-1", &digest("component-1", "v1"))
        .await
        .unwrap();
    assert_eq!(client.tags("component-1").await.unwrap(), vec!["v2"]);
}

#[tokio::test]
async fn test_bearer_token_challenge() {
    let (state, addr) = start(true, true).await;
    state
        .tags
        .lock()
        .unwrap()
        .insert("team/app".to_string(), vec!["1".to_string()]);
    let client = client(addr);

    let image = ImageRef::parse(&format!("{addr}/team/app:1")).unwrap();
    assert!(client.exists(&image, None).await.unwrap());
    assert!(!client.exists(&image.with_tag("2"), None).await.unwrap());
    assert!(state.token_requests.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_delete_disabled_is_reported() {
    let (state, addr) = start(false, false).await;
    let client = client(addr);
    let err = client
        .delete_manifest("component-1", "sha256:abc")
        .await
        .unwrap_err();
    assert!(matches!(err, BuilderError::RegistryWriteDisabled));
    assert_eq!(state.delete_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_trusted_repository_created_when_absent() {
    let (state, addr) = start(false, true).await;
    let registry = TrustedRegistryClient::new(client(addr).resolver());
    let credential = RegistryCredential {
        username: "u".to_string(),
        password: "p".to_string(),
    };
    let domain = addr.to_string();

    assert!(!registry
        .repository_exists(&domain, "team", "app", &credential)
        .await
        .unwrap());
    let description = "x".repeat(300);
    registry
        .create_repository(&domain, "team", "app", &description, &credential)
        .await
        .unwrap();
    assert!(registry
        .repository_exists(&domain, "team", "app", &credential)
        .await
        .unwrap());
    // a second create answers 400, which counts as success
    registry
        .create_repository(&domain, "team", "app", "again", &credential)
        .await
        .unwrap();

    let created = state.created.lock().unwrap();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0]["shortDescription"].as_str().unwrap().len(), 140);
    assert_eq!(created[0]["visibility"], "private");
}
