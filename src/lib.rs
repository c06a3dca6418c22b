//! # loralink-rs: LoRa Point-to-Point Field-Test Responder
//!
//! Field-testing core for exercising device-to-device LoRa links from a
//! Raspberry Pi: a register-level half-duplex driver for the Semtech
//! SX1276 (Dragino HAT wiring, manual chip select, DIO0 interrupt), an
//! alternate driver for the UART-attached Microchip RN2903 modem, and two
//! link modes on top of a uniform radio capability: a periodic beacon
//! transmitter and a receive-and-echo responder that turns the radio
//! around on every packet.
//!
//! ## Features
//!
//! - SX1276 bring-up, bit-exact parameter programming, transmit with IRQ
//!   polling and DIO0 interrupt, continuous/single receive, RSSI/SNR
//!   extraction
//! - RN2903 line protocol: wake-up handshake, one in-flight command,
//!   asynchronous `radio_rx`/`radio_tx_ok` notification fan-out
//! - One capability set over both backends, selected once at startup
//! - Beacon and echo link modes with strict half-duplex turnaround
//! - Append-only event sink contract for TX/RX/lifecycle records
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loralink_rs::{
//!     config, AppConfig, BeaconHandle, LogEventSink, RadioHandle,
//! };
//!
//! # async fn demo() -> Result<(), loralink_rs::LinkError> {
//! let cfg = config::init_global(AppConfig::load(None)?);
//! let radio = RadioHandle::connect(cfg).await?;
//! let beacon = BeaconHandle::spawn(
//!     Arc::new(radio),
//!     Arc::new(LogEventSink),
//!     &cfg.beacon,
//! );
//! beacon.start(Default::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod error;
pub mod event_sink;
pub mod link;
pub mod logging;
pub mod radio;
pub mod util;

pub use config::{AppConfig, Backend};
pub use error::LinkError;
pub use event_sink::{EventSink, LogEventSink};
pub use link::{BeaconHandle, BeaconOptions, EchoHandle, EchoOptions};
pub use logging::{init_logger, log_error, log_info};
pub use radio::{
    RadioBackend, RadioConfig, RadioEvent, RadioHandle, RadioMode, RxFrame, TxOutcome,
};
