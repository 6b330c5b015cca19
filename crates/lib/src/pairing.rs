//! Account pairing: render bridge pairing codes as terminal QR codes until the bridge reports
//! the outcome.

use anyhow::{bail, Result};
use qrcode::render::unicode::Dense1x2;
use qrcode::QrCode;
use tokio::sync::mpsc;

use crate::transport::PairingEvent;

/// Render a pairing code as a half-block unicode QR code.
pub fn render_qr(code: &str) -> Result<String> {
    let qr = QrCode::new(code.as_bytes())?;
    Ok(qr
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}

/// Consume pairing events until pairing succeeds. Timeout, logout, or the stream closing
/// before success is an error.
pub async fn run_pairing(events: &mut mpsc::UnboundedReceiver<PairingEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            PairingEvent::Code(code) => match render_qr(&code) {
                Ok(qr) => println!("{}", qr),
                Err(e) => {
                    log::warn!("could not render pairing code as QR: {}", e);
                    println!("pairing code: {}", code);
                }
            },
            PairingEvent::Success => {
                println!("login event: {}", event.name());
                return Ok(());
            }
            PairingEvent::Timeout | PairingEvent::LoggedOut => {
                println!("login event: {}", event.name());
                bail!("pairing failed: {}", event.name());
            }
        }
    }
    bail!("bridge closed before pairing completed")
}
