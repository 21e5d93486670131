//! Service wiring
//!
//! Builds the session manager, scheduler and contact store from [`Config`],
//! serves the HTTP API, and tears everything down on Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, create_router};
use crate::channels::whatsapp::{WhatsAppClient, render_qr_unicode};
use crate::config::Config;
use crate::contacts::SegmentStore;
use crate::scheduler::DispatchScheduler;
use crate::session::{LifecycleEvent, SessionManager, StoreCleaner};

/// Run the dispatcher until a shutdown signal arrives.
pub async fn serve(config: Config) -> Result<()> {
    tokio::fs::create_dir_all(&config.server.uploads_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create uploads directory: {}",
                config.server.uploads_dir.display()
            )
        })?;

    let provider = WhatsAppClient::new(config.session.store_dir.clone());
    let (session, session_task) = SessionManager::spawn(
        Arc::new(provider),
        StoreCleaner::default(),
        config.session.clone(),
    );

    let relay = tokio::spawn(relay_lifecycle(session.clone(), config.session.print_qr));
    session.start()?;

    let cancel = CancellationToken::new();
    let scheduler = Arc::new(DispatchScheduler::new(
        Arc::new(session.clone()),
        config.scheduler.history_limit,
    ));
    let scheduler_task = tokio::spawn(scheduler.clone().run(config.scheduler.tick(), cancel.clone()));

    let segments = Arc::new(SegmentStore::load(config.contacts.segments_path.clone()).await);

    let state = Arc::new(AppState {
        session: session.clone(),
        scheduler,
        segments,
        uploads_dir: config.server.uploads_dir.clone(),
        max_upload_bytes: config.server.max_upload_bytes,
    });
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    cancel.cancel();
    if let Err(e) = scheduler_task.await {
        tracing::warn!("Scheduler task ended abnormally: {}", e);
    }
    session.shutdown().await;
    relay.abort();
    if let Err(e) = session_task.await {
        tracing::warn!("Session task ended abnormally: {}", e);
    }

    tracing::info!("Dispatcher stopped");
    served.context("HTTP server error")
}

/// Log lifecycle changes and print pairing codes for the operator.
async fn relay_lifecycle(session: SessionManager, print_qr: bool) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::PairingCode { code }) => {
                tracing::info!("Pairing code received; scan it from the phone's linked devices screen");
                if print_qr {
                    match render_qr_unicode(&code) {
                        Some(qr) => println!("{}", qr),
                        None => tracing::warn!("Pairing code could not be rendered as QR"),
                    }
                }
            }
            Ok(LifecycleEvent::ResetFailed { message }) => {
                tracing::error!("Session reset failed: {}. POST /api/force-reset to retry", message);
            }
            Ok(LifecycleEvent::RecoveryExhausted { attempts }) => {
                tracing::error!(
                    "Session did not recover after {} automatic reset(s). POST /api/force-reset to retry",
                    attempts
                );
            }
            Ok(event) => tracing::info!("Session event: {}", event.name()),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Lifecycle relay skipped {} event(s)", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received terminate signal, shutting down"),
    }
}
