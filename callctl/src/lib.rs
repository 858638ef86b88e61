//! # callctl: Call Control Layer
//!
//! `callctl` tracks the lifecycle of outbound and inbound phone calls placed
//! through an external AI voice-call provider, turning the provider's
//! asynchronous (possibly duplicated, possibly missing) webhook events into
//! a consistent local record of each call's status, transcript, and business
//! outcome.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) with
//! PostgreSQL for persistence (an in-memory store backs tests and local
//! development). Four components do the real work:
//!
//! - The **webhook ingestor** ([`ingest`]) receives provider push events.
//!   Every payload is persisted to an append-only event log before
//!   processing, and every delivery is acknowledged with a 200 regardless of
//!   what happened inside: failures are recorded on the log entry, never
//!   surfaced to the provider.
//! - The **lifecycle state machine** ([`lifecycle`]) applies event-driven
//!   transitions. Planning is pure and monotonic: a call only moves toward
//!   states of equal-or-greater terminal rank, duplicate events are no-ops,
//!   and timestamps are recorded at first observation only. Terminal events
//!   run the outcome classifier and campaign bookkeeping.
//! - The **reconciliation poller** ([`reconcile`]) repairs state when
//!   webhooks never arrive: on an interval (or manual trigger) it pulls
//!   authoritative provider state for calls stuck past a grace window and
//!   pushes ended ones through the same terminal path as the ingestor.
//! - The **batch dispatcher** ([`dispatch`]) issues a campaign's calls in
//!   bounded-concurrency chunks, recording every attempt locally before the
//!   provider is asked so rejected dispatches stay visible.
//!
//! Status/outcome changes fan out to connected clients through a broadcast
//! channel ([`notify`]) and, for booked appointments, an email notification.
//!
//! ## Quick start
//!
//! ```no_run
//! use clap::Parser;
//! use callctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = callctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     callctl::telemetry::init_telemetry()?;
//!
//!     Application::new(config).await?.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod errors;
pub mod ingest;
pub mod lifecycle;
pub mod notify;
pub mod provider;
pub mod reconcile;
pub mod store;
pub mod telemetry;
pub mod types;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::Config;

use crate::dispatch::BatchDispatcher;
use crate::ingest::WebhookIngestor;
use crate::lifecycle::CallLifecycle;
use crate::notify::email::AppointmentMailer;
use crate::notify::BroadcastNotifier;
use crate::reconcile::{Reconciler, ReconcilerHandle};
use crate::store::in_memory::InMemoryCallStore;
use crate::store::postgres::PostgresCallStore;
use crate::store::CallStore;

pub use types::{CallId, CampaignId, ContactId};

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub store: Arc<dyn CallStore>,
    pub config: Config,
    pub ingestor: Arc<WebhookIngestor>,
    pub reconciler: Arc<Reconciler>,
    pub reconciler_handle: ReconcilerHandle,
    pub dispatcher: Arc<BatchDispatcher>,
    /// Broadcast hub the realtime push transport subscribes to.
    pub realtime: Arc<BroadcastNotifier>,
}

/// The assembled application: router plus background services.
pub struct Application {
    state: AppState,
    router: Router,
    shutdown_token: CancellationToken,
}

impl Application {
    /// Wire up storage, the provider client, the lifecycle services, and the
    /// background reconciliation daemon.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn CallStore> = match &config.storage {
            config::StorageConfig::Postgres(db_config) => {
                let pool = db::connect(db_config).await?;
                tracing::info!("Connected to PostgreSQL call store");
                Arc::new(PostgresCallStore::new(pool))
            }
            config::StorageConfig::Memory => {
                tracing::warn!("Using in-memory call store: nothing survives a restart");
                Arc::new(InMemoryCallStore::new())
            }
        };

        let provider = provider::create_provider(&config.provider);
        let realtime = Arc::new(BroadcastNotifier::new(config.realtime.channel_capacity));

        let mailer = match &config.email {
            Some(email_config) => Some(Arc::new(AppointmentMailer::new(email_config)?)),
            None => None,
        };

        let callback_lookback = chrono::Duration::from_std(config.dispatch.callback_lookback)
            .map_err(anyhow::Error::from)?;

        let lifecycle = CallLifecycle::new(store.clone(), realtime.clone(), mailer, callback_lookback);

        let ingestor = Arc::new(WebhookIngestor::new(
            store.clone(),
            lifecycle.clone(),
            provider.clone(),
            realtime.clone(),
            config.provider_default_assistant(),
            callback_lookback,
        ));

        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            provider.clone(),
            lifecycle.clone(),
            config.reconciler.interval,
            chrono::Duration::from_std(config.reconciler.grace).map_err(anyhow::Error::from)?,
            config.reconciler.batch_limit,
        ));

        let shutdown_token = CancellationToken::new();
        let reconciler_handle = reconciler.clone().spawn(shutdown_token.clone());

        let dispatcher = Arc::new(BatchDispatcher::new(
            store.clone(),
            provider,
            lifecycle,
            config.dispatch.chunk_delay,
            config.provider_phone_number_id(),
        ));

        let state = AppState::builder()
            .store(store)
            .config(config)
            .ingestor(ingestor)
            .reconciler(reconciler)
            .reconciler_handle(reconciler_handle)
            .dispatcher(dispatcher)
            .realtime(realtime)
            .build();

        let router = router(state.clone());

        Ok(Self {
            state,
            router,
            shutdown_token,
        })
    }

    /// The assembled router, for tests that drive the HTTP surface directly.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then stop background daemons and
    /// drain in-flight requests.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "callctl listening");

        let token = self.shutdown_token.clone();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                token.cancel();
            })
            .await?;

        Ok(())
    }
}

/// Build the HTTP router.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/webhooks/vapi", post(api::handlers::webhooks::provider_webhook))
        .route("/calls/sync", post(api::handlers::calls::sync_all))
        .route("/calls/{id}", get(api::handlers::calls::get_call))
        .route("/calls/{id}/sync", post(api::handlers::calls::sync_one))
        .route("/campaigns/{id}/dispatch", post(api::handlers::campaigns::dispatch_campaign));

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .layer(prometheus_layer)
            .route("/metrics", get(move || async move { metric_handle.render() }));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
