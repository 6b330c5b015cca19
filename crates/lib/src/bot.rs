//! Process lifecycle: connect the bridge, pair if needed, dispatch inbound events until the
//! bridge closes or the process is asked to stop, then disconnect once.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::{self, Config};
use crate::dispatch::{Dispatcher, Session};
use crate::generation::GenerationClient;
use crate::pairing;
use crate::transport::{BridgeTransport, PairingEvent, Transport};

/// Run the bot. `bridge_url` overrides the configured/env bridge URL.
pub async fn run(config: Config, bridge_url: Option<String>) -> Result<()> {
    let credentials = config::resolve_credentials(&config);
    let missing = credentials.missing();
    if !missing.is_empty() {
        log::warn!(
            "missing backend credentials: {} (requests to those backends will be rejected)",
            missing.join(", ")
        );
    }
    let generator = GenerationClient::from_config(&config, &credentials);

    let url = bridge_url
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| config::resolve_bridge_url(&config));
    log::info!("connecting to bridge at {}", url);
    let (transport, mut streams) = BridgeTransport::connect(&url, &config.bridge.client_id)
        .await
        .with_context(|| format!("connecting to bridge at {}", url))?;

    if !streams.logged_in {
        log::info!("account not paired; scan the QR code with your phone");
        if let Err(e) = pairing::run_pairing(&mut streams.pairing).await {
            transport.disconnect().await;
            return Err(e);
        }
    }

    let session = Session::new(transport.clone(), Arc::new(generator))
        .with_max_concurrent_handlers(config.dispatch.max_concurrent_handlers);
    let dispatcher = Dispatcher::new(session);
    log::info!("listening for messages");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            event = streams.events.recv() => match event {
                Some(event) => {
                    dispatcher.dispatch(event);
                }
                None => {
                    log::warn!("bridge closed the event stream");
                    break;
                }
            },
            Some(pairing_event) = streams.pairing.recv() => {
                if pairing_event == PairingEvent::LoggedOut {
                    log::warn!("account was logged out; stopping");
                    break;
                }
                log::debug!("ignoring login event: {}", pairing_event.name());
            }
            _ = &mut shutdown => {
                log::info!("shutdown requested");
                break;
            }
        }
    }

    transport.disconnect().await;
    Ok(())
}

/// Completes on SIGINT or SIGTERM. If a handler cannot be installed, that signal is never seen.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
