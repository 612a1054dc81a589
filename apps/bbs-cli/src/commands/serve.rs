//! `bbsource serve`

use anyhow::{Context, Result};
use bbs_webhook::create_webhook_router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use crate::app::{render, App};

pub async fn run(app: &App, bind: SocketAddr) -> Result<()> {
    let (dispatcher, mut receiver) = app.dispatcher();
    let router = create_webhook_router(Arc::new(dispatcher));

    tokio::spawn(async move {
        while let Some(work) = receiver.recv().await {
            match render(&work) {
                Ok(document) => info!(event = %document, "Propagated webhook event"),
                Err(e) => error!(error = %e, "Failed to render propagated event"),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context("Failed to bind webhook listener")?;
    info!(%bind, "Listening for webhook deliveries");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
