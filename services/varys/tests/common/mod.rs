use axum::Router;
use axum::body::Body;
use axum::http::Request;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::RwLock;
use varys::app::{AppState, build_router};
use varys::auth::rbac::build_enforcer;
use varys::auth::rbac::policy::{DEFAULT_POLICY, ensure_policy};
use varys::config::{
    AuthConfig, BasicAuthConfig, CredentialConfig, DatabaseConfig, EncryptionConfig, StaticUser,
    VarysConfig,
};
use varys::store::KvStore;

// Test users authenticate with password == username. alice is an
// operator; bob and carol hold no groups until granted.
pub const OPERATOR: &str = "alice";

fn static_user(username: &str, groups: &[&str]) -> StaticUser {
    StaticUser {
        username: username.to_string(),
        password: username.to_string(),
        groups: groups.iter().map(|group| group.to_string()).collect(),
    }
}

fn test_config(dir: &TempDir) -> VarysConfig {
    VarysConfig {
        bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
        database: DatabaseConfig {
            path: dir.path().join("db.varys"),
            encryption: EncryptionConfig {
                key: "test-encryption-passphrase".to_string(),
                key_rotation_hours: 120,
            },
        },
        credential: CredentialConfig {
            root_key: "test-root-key".to_string(),
        },
        auth: AuthConfig {
            auth_type: "basic".to_string(),
            basic: BasicAuthConfig {
                users: vec![
                    static_user("alice", &["admin:varys"]),
                    static_user("bob", &[]),
                    static_user("carol", &[]),
                ],
            },
        },
    }
}

/// Build a full application over a fresh temp store. The TempDir must
/// outlive the router.
pub async fn test_app() -> (Router, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let config = test_config(&dir);

    let kv = Arc::new(
        KvStore::open(&config.database.path, &config.database.encryption.key).expect("open store"),
    );
    let mut enforcer = build_enforcer(kv.clone()).await.expect("enforcer");
    ensure_policy(&kv, &mut enforcer, DEFAULT_POLICY)
        .await
        .expect("default policy");

    let state = AppState::new(&config, kv, Arc::new(RwLock::new(enforcer)));
    (build_router(state), dir)
}

pub fn basic_auth(username: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{username}:{username}"))
    )
}

pub fn authed_request(method: &str, uri: &str, username: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", basic_auth(username))
        .body(Body::empty())
        .expect("request")
}

pub fn authed_json_request(
    method: &str,
    uri: &str,
    username: &str,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", basic_auth(username))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

// Keep the dead-code lint quiet for helpers only some test binaries use.
#[allow(dead_code)]
pub fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("db.varys")
}
