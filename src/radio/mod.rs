//! # Radio Backends and Shared Radio Types
//!
//! Two backends drive a point-to-point LoRa link:
//!
//! - [`sx1276`]: register-level driver for the Semtech SX1276 on a Dragino
//!   HAT (SPI with a manually driven chip select, reset line, DIO0
//!   interrupt),
//! - [`rn2903`]: AT-style line protocol to a Microchip RN2903 modem over
//!   a serial port.
//!
//! The [`facade`] module presents one capability set over both. This module
//! holds the types the backends share.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::LinkError;

pub mod facade;
pub mod rn2903;
pub mod sx1276;

pub use facade::{RadioBackend, RadioHandle};

/// The ten LoRa bandwidths the SX1276 supports, in register order.
pub const BANDWIDTHS_HZ: [u32; 10] = [
    7_800, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
];

/// Current radio parameters, also the validated configuration a backend is
/// brought up with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Carrier frequency in Hz, 137 MHz ..= 1020 MHz.
    pub frequency_hz: u32,
    /// Spreading factor, 6..=12 (chips per symbol = 2^SF).
    pub spreading_factor: u8,
    /// Bandwidth in Hz, one of [`BANDWIDTHS_HZ`].
    pub bandwidth_hz: u32,
    /// Coding rate denominator, 5..=8 (4/5 .. 4/8).
    pub coding_rate: u8,
    /// Transmit power in dBm, 2..=20 (PA_BOOST output).
    pub tx_power_dbm: u8,
    /// Sync word. 0x34 interoperates with the RN2903 default.
    pub sync_word: u8,
    /// Preamble length in symbols.
    pub preamble_len: u16,
    /// Append and check the payload CRC.
    pub crc_on: bool,
    /// Implicit (fixed-length) header mode. Mandatory at SF6.
    pub implicit_header: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 915_000_000,
            spreading_factor: 7,
            bandwidth_hz: 125_000,
            coding_rate: 5,
            tx_power_dbm: 14,
            sync_word: 0x34,
            preamble_len: 8,
            crc_on: true,
            implicit_header: false,
        }
    }
}

impl RadioConfig {
    /// Validate every field range plus the SF6/implicit-header coupling.
    pub fn validate(&self) -> Result<(), LinkError> {
        if !(137_000_000..=1_020_000_000).contains(&self.frequency_hz) {
            return Err(LinkError::InvalidParam(format!(
                "frequency {} Hz out of range 137..=1020 MHz",
                self.frequency_hz
            )));
        }
        if !(6..=12).contains(&self.spreading_factor) {
            return Err(LinkError::InvalidParam(format!(
                "spreading factor {} out of range 6..=12",
                self.spreading_factor
            )));
        }
        if bandwidth_index(self.bandwidth_hz).is_none() {
            return Err(LinkError::InvalidParam(format!(
                "unsupported bandwidth {} Hz",
                self.bandwidth_hz
            )));
        }
        if !(5..=8).contains(&self.coding_rate) {
            return Err(LinkError::InvalidParam(format!(
                "coding rate 4/{} out of range 4/5..=4/8",
                self.coding_rate
            )));
        }
        if !(2..=20).contains(&self.tx_power_dbm) {
            return Err(LinkError::InvalidParam(format!(
                "TX power {} dBm out of range 2..=20",
                self.tx_power_dbm
            )));
        }
        if self.spreading_factor == 6 && !self.implicit_header {
            return Err(LinkError::InvalidParam(
                "SF6 requires implicit header mode".into(),
            ));
        }
        Ok(())
    }
}

/// Index of a bandwidth in the chip's ordered table, if supported.
pub fn bandwidth_index(bandwidth_hz: u32) -> Option<u8> {
    BANDWIDTHS_HZ
        .iter()
        .position(|&bw| bw == bandwidth_hz)
        .map(|i| i as u8)
}

/// Radio operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Lowest power; configuration registers retained.
    Sleep,
    /// Oscillator running, ready for configuration and TX/RX setup.
    Standby,
    /// Transmitting the FIFO payload.
    Tx,
    /// Receiving until told otherwise.
    RxContinuous,
    /// Receiving a single packet, then back to standby.
    RxSingle,
}

impl RadioMode {
    /// True for the armed receive modes.
    pub fn is_rx(self) -> bool {
        matches!(self, RadioMode::RxContinuous | RadioMode::RxSingle)
    }
}

/// A received frame as delivered to subscribers.
///
/// Signal metadata is `None` on backends that do not report it (the RN2903
/// gives no RSSI/SNR with `radio_rx`); it is never fabricated.
#[derive(Debug, Clone, PartialEq)]
pub struct RxFrame {
    /// Payload, 1..=255 bytes.
    pub bytes: Vec<u8>,
    /// Packet RSSI in dBm.
    pub rssi_dbm: Option<i16>,
    /// Packet SNR in dB (quarter-dB resolution on the SX1276).
    pub snr_db: Option<f32>,
}

/// Result of a transmit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// Transmit-done was observed.
    Ok,
    /// No completion within the 5 s transmit budget.
    Timeout,
    /// The backend rejected or failed the transmission.
    Err,
}

/// Events fanned out to subscribers, in backend arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// A frame passed CRC and was read out.
    Frame(RxFrame),
    /// A transmission completed.
    TxDone,
    /// A transmission failed.
    TxError,
}

/// Identifies one subscriber in a backend's fan-out set.
pub type SubscriberId = u32;

/// Channel on which a subscriber receives [`RadioEvent`]s.
pub type EventSender = mpsc::UnboundedSender<RadioEvent>;

static NEXT_SUBSCRIBER: AtomicU32 = AtomicU32::new(1);

/// Allocate a process-unique subscriber id.
pub fn next_subscriber_id() -> SubscriberId {
    NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed)
}
