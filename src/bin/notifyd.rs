//! Composition root: wires configuration, the durable queue, the worker
//! pool, the queue gauge, and the submission HTTP server together and
//! runs them until shutdown (§5, §9 Design Note "no global singletons
//! beyond the Queue handle and the logger sink").

use anyhow::Context;
use notifyd::config::NotifydConfig;
use notifyd::delivery::{DeliveryWorkflow, PgPreferenceStore};
use notifyd::directories::{HttpCatalogClient, HttpIdentityClient};
use notifyd::encryption::Cloak;
use notifyd::mail::SmtpMailClient;
use notifyd::queue::{PgQueue, Queue};
use notifyd::strategy::StrategyDeterminer;
use notifyd::submission::{router, PgCampaignTypeLookup, SubmissionState};
use notifyd::template::PgTemplateStore;
use notifyd::worker::WorkerGenerator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    notifyd::observability::init().context("failed to initialize observability")?;

    let config = NotifydConfig::load().context("failed to load configuration")?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    let queue = Arc::new(PgQueue::new(pool.clone()));
    queue.migrate().await.context("failed to migrate jobs table")?;

    let templates = Arc::new(PgTemplateStore::new(pool.clone()));
    templates.migrate().await.context("failed to migrate templates tables")?;

    let preferences = Arc::new(PgPreferenceStore::new(pool.clone()));
    preferences
        .migrate()
        .await
        .context("failed to migrate preference tables")?;

    let key_bytes = hex::decode(&config.encryption.key_hex).context("invalid ENCRYPTION_KEY hex")?;
    let cloak = Arc::new(Cloak::new(&key_bytes, 0).context("invalid encryption key length")?);

    let identity = Arc::new(HttpIdentityClient::new(
        config.directories.uaa_host.clone(),
        config.directories.request_timeout(),
    ));
    let catalog = Arc::new(HttpCatalogClient::new(
        config.directories.cc_host.clone(),
        config.directories.request_timeout(),
    ));

    let mut strategies: HashMap<String, Arc<dyn notifyd::audience::AudienceGenerator>> = HashMap::new();
    strategies.insert("email".to_string(), Arc::new(notifyd::audience::EmailStrategy));
    strategies.insert(
        "user".to_string(),
        Arc::new(notifyd::audience::UserStrategy::new(identity.clone())),
    );
    strategies.insert(
        "space".to_string(),
        Arc::new(notifyd::audience::SpaceStrategy::new(catalog.clone(), identity.clone())),
    );
    strategies.insert(
        "org".to_string(),
        Arc::new(notifyd::audience::OrgStrategy::new(catalog.clone(), identity.clone(), None)),
    );
    let strategy = Arc::new(StrategyDeterminer::new(strategies));

    let mailer = Arc::new(SmtpMailClient::new(&config.smtp).context("failed to build SMTP transport")?);
    let delivery = Arc::new(DeliveryWorkflow::new(
        templates,
        preferences,
        mailer,
        config.smtp.clone(),
    ));

    let worker_generator = WorkerGenerator::new(
        Arc::clone(&queue) as Arc<dyn Queue>,
        Arc::clone(&cloak),
        Arc::clone(&strategy),
        Arc::clone(&delivery),
        config.worker.clone(),
    );

    let shutdown = CancellationToken::new();
    let worker_handles = worker_generator.spawn(shutdown.clone());

    let gauge_handle = tokio::spawn(notifyd::metrics::run(
        Arc::clone(&queue) as Arc<dyn Queue>,
        std::time::Duration::from_secs(10),
        shutdown.clone(),
    ));

    let campaign_types = Arc::new(PgCampaignTypeLookup::new(pool));
    let state = SubmissionState {
        queue: Arc::clone(&queue) as Arc<dyn Queue>,
        cloak,
        campaign_types,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .context("failed to bind submission listener")?;
    tracing::info!("notifyd listening on 0.0.0.0:8080");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown.clone()));
    server.await.context("submission server failed")?;

    shutdown.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = gauge_handle.await;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl_c");
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
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
