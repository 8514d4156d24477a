//! Colloquy server binary.
//!
//! Establishes store connections before accepting traffic; on SIGTERM or
//! ctrl-c stops accepting new turns and waits for in-flight turns to reach a
//! terminal state before closing.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use colloquy::adapters::ai::{AnthropicConfig, AnthropicProvider, OpenAiConfig, OpenAiProvider};
use colloquy::adapters::auth::JwtTokenValidator;
use colloquy::adapters::http::{router, AppState};
use colloquy::adapters::postgres::{
    PostgresMessageStore, PostgresSessionStore, PostgresUserStore,
};
use colloquy::adapters::rate_limiter::{FallbackRateLimiter, RedisRateLimiter};
use colloquy::application::{
    ContextConfig, ContextManager, ProviderRegistry, TurnLimits, TurnOrchestrator,
};
use colloquy::config::AppConfig;
use colloquy::domain::foundation::{Clock, SystemClock};
use colloquy::domain::safety::SafetyGate;
use colloquy::ports::{InMemoryMetrics, MetricsSink, RateLimiter, SessionStore, TokenValidator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(
        environment = ?config.server.environment,
        "starting colloquy"
    );

    // Stores connect before the listener opens.
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;

    let users = Arc::new(PostgresUserStore::new(pool.clone()));
    let sessions = Arc::new(PostgresSessionStore::new(pool.clone()));
    let messages = Arc::new(PostgresMessageStore::new(pool.clone()));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetrics::new());

    // Shared rate-limit store is optional; without it the limiter is
    // process-local.
    let shared_limiter = match &config.redis.url {
        Some(url) if config.redis.is_configured() => {
            let client = redis::Client::open(url.as_str())?;
            let conn = client.get_multiplexed_tokio_connection().await?;
            tracing::info!("connected to shared rate-limit store");
            Some(RedisRateLimiter::new(conn))
        }
        _ => {
            tracing::info!("no shared rate-limit store configured, using in-process limiter");
            None
        }
    };
    let rate_limiter: Arc<dyn RateLimiter> =
        Arc::new(FallbackRateLimiter::new(shared_limiter, metrics.clone()));

    // Provider registry: the mock is always present as the last resort.
    let mut registry = ProviderRegistry::new(config.ai.default_provider.clone());
    if config.ai.has_anthropic() {
        let key = config.ai.anthropic_api_key.clone().unwrap_or_default();
        registry.register(Arc::new(AnthropicProvider::new(
            AnthropicConfig::new(key).with_timeout(config.ai.timeout()),
        )));
    }
    if config.ai.has_openai() {
        let key = config.ai.openai_api_key.clone().unwrap_or_default();
        registry.register(Arc::new(OpenAiProvider::new(
            OpenAiConfig::new(key).with_timeout(config.ai.timeout()),
        )));
    }
    let registry = Arc::new(registry);

    let summariser = registry
        .get(config.ai.summariser())
        .unwrap_or_else(|| registry.get("mock").expect("mock provider is registered"));

    let context = ContextManager::new(
        sessions.clone(),
        messages.clone(),
        summariser,
        clock.clone(),
        metrics.clone(),
        ContextConfig {
            summarisation_threshold: config.chat.summarisation_threshold,
            recency_window_minutes: config.chat.summarisation_recent_window_minutes,
            max_context_tokens: config.chat.max_context_tokens,
        },
    );

    let safety = Arc::new(SafetyGate::new(
        config.chat.safety_inbound_confidence_threshold,
    ));

    let orchestrator = TurnOrchestrator::new(
        users.clone(),
        sessions.clone(),
        messages.clone(),
        registry,
        rate_limiter.clone(),
        safety,
        context,
        clock.clone(),
        metrics.clone(),
        TurnLimits {
            chat_max_requests: config.chat.chat_rate_limit_max_requests,
            turn_timeout: config.chat.turn_timeout(),
            ..TurnLimits::default()
        },
    );

    let validator: Arc<dyn TokenValidator> = {
        let mut v = JwtTokenValidator::new(config.auth.jwt_secret.clone());
        if let Some(issuer) = &config.auth.issuer {
            v = v.with_issuer(issuer);
        }
        Arc::new(v)
    };

    let state = AppState {
        orchestrator,
        users,
        sessions: sessions.clone(),
        messages,
        validator,
        rate_limiter,
        metrics,
        clock: clock.clone(),
        chat: config.chat.clone(),
    };

    // Daily sweep deactivating sessions past the inactivity TTL.
    {
        let sessions = sessions.clone();
        let clock = clock.clone();
        let ttl_days = config.chat.session_ttl_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
            loop {
                interval.tick().await;
                match sessions.deactivate_expired(ttl_days, clock.now()).await {
                    Ok(0) => {}
                    Ok(count) => tracing::info!(count, "expired inactive sessions"),
                    Err(e) => tracing::warn!(error = %e, "session expiry sweep failed"),
                }
            }
        });
    }

    let app = router(
        state,
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let addr = config.server.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    // On signal: stop accepting, then wait up to the drain window for
    // in-flight turns to reach a terminal state.
    let (signal_tx, mut signal_rx) = tokio::sync::watch::channel(());
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = signal_tx.send(());
    });

    let drain = Duration::from_secs(config.server.shutdown_drain_secs);
    let mut drain_rx = signal_rx.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = signal_rx.changed().await;
        tracing::info!("shutdown signal received, no longer accepting turns");
    });

    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = drain_rx.changed().await;
            tokio::time::sleep(drain).await;
        } => {
            tracing::warn!(
                drain_secs = drain.as_secs(),
                "drain window elapsed with turns still in flight"
            );
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
