//! # Event Sink
//!
//! The link modes record every transmission, reception and lifecycle
//! marker to an append-only sink owned by the surrounding application.
//! Only the contract lives here, plus a log-backed default. Sinks must be
//! non-blocking: recording is best effort and never applies backpressure
//! to the radio path.

use crate::util::hex::format_hex_compact;

/// Append-only recorder of link traffic and lifecycle events.
pub trait EventSink: Send + Sync {
    /// A payload was handed to the radio for transmission.
    fn tx(&self, payload: &[u8], hex: &str);

    /// A frame was received. Signal metadata is absent on backends that
    /// do not report it.
    fn rx(&self, payload: &[u8], hex: &str, rssi_dbm: Option<i16>, snr_db: Option<f32>);

    /// Lifecycle marker (`tx_ok`, `tx_error`, mode start/stop tags).
    fn event(&self, tag: &str);
}

/// Default sink that writes structured lines through the `log` facade.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn tx(&self, payload: &[u8], hex: &str) {
        log::info!(
            target: "loralink::events",
            "TX {} bytes [{}] {}",
            payload.len(),
            format_hex_compact(payload),
            hex
        );
    }

    fn rx(&self, payload: &[u8], hex: &str, rssi_dbm: Option<i16>, snr_db: Option<f32>) {
        log::info!(
            target: "loralink::events",
            "RX {} bytes [{}] {} rssi={} snr={}",
            payload.len(),
            format_hex_compact(payload),
            hex,
            rssi_dbm.map_or("-".to_string(), |v| format!("{v} dBm")),
            snr_db.map_or("-".to_string(), |v| format!("{v:.2} dB")),
        );
    }

    fn event(&self, tag: &str) {
        log::info!(target: "loralink::events", "EVENT {tag}");
    }
}
