use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::{info, warn};

use storefront_api as api;
use storefront_api::gateway::{HttpPaymentGateway, PaymentGateway, SandboxGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("loading configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    let (event_tx, event_rx) = mpsc::channel(cfg.event_buffer);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let gateway: Arc<dyn PaymentGateway> = match cfg.gateway.mode.as_str() {
        "http" => {
            info!(base_url = %cfg.gateway.base_url, "using HTTP payment gateway");
            Arc::new(HttpPaymentGateway::new(
                cfg.gateway.base_url.clone(),
                Duration::from_secs(cfg.gateway.timeout_secs),
            )?)
        }
        other => {
            if other != "sandbox" {
                warn!(mode = other, "unknown gateway mode, falling back to sandbox");
            }
            Arc::new(SandboxGateway::default())
        }
    };

    let state = api::AppState::build(cfg.clone(), gateway, event_sender);

    // Scheduler collaborator: periodically expire abandoned orders.
    {
        let checkout = state.checkout.clone();
        let window = chrono::Duration::minutes(cfg.payment_expiry_minutes);
        let interval = Duration::from_secs(cfg.expiry_sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                checkout.expire_stale(chrono::Utc::now() - window).await;
            }
        });
    }

    let app = api::api::app_router(state);
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid listen address")?;
    info!(%addr, "storefront API listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding listener")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
