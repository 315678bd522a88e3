// Varys (HTTP)
// ------------
// This binary is the derivation-based credentials engine. It exposes a
// JSON/HTTP API (Axum) for managing services, users, and grants, and for
// deriving credentials on demand. Credentials are never stored, only
// regenerated from the root key, the per-service key material, and the
// caller's rotation counter.
//
// Startup order: configuration, logging, the encrypted embedded store,
// the authorization enforcer (policy loaded from the store, default
// policy ensured), then the listener. Teardown happens in reverse when
// the serve loop returns.
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::RwLock;
use varys::app::{AppState, build_router};
use varys::auth::rbac::policy::{DEFAULT_POLICY, ensure_policy};
use varys::auth::rbac::build_enforcer;
use varys::config::VarysConfig;
use varys::observability;
use varys::store::KvStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = VarysConfig::from_env_or_yaml()?;
    observability::init_observability();

    tracing::info!(path = %config.database.path.display(), "opening database");
    let kv = Arc::new(
        KvStore::open(&config.database.path, &config.database.encryption.key)
            .context("open database")?,
    );

    tracing::info!("loading authorization policy");
    let mut enforcer = build_enforcer(kv.clone()).await?;
    ensure_policy(&kv, &mut enforcer, DEFAULT_POLICY)
        .await
        .context("ensure default policy")?;
    let enforcer = Arc::new(RwLock::new(enforcer));

    let state = AppState::new(&config, kv, enforcer);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "starting varys");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    tracing::info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
