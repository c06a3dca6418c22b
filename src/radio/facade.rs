//! # Radio Facade
//!
//! One capability set over both backends. The capability is a trait so the
//! link modes (and their tests) depend on behavior, not on a chip; the
//! facade itself is a thin dispatch over a tagged variant; exactly one
//! backend is selected at startup from configuration and stays fixed for
//! the process lifetime.
//!
//! Fan-out semantics: every backend event reaches every current
//! subscriber; delivery order across subscribers is unspecified, but each
//! subscriber sees events in backend arrival order.

use async_trait::async_trait;

use crate::config::{AppConfig, Backend};
use crate::error::LinkError;
use crate::radio::rn2903::{transport, Rn2903Handle};
use crate::radio::sx1276::Sx1276Handle;
use crate::radio::{EventSender, RadioConfig, SubscriberId, TxOutcome};

/// The uniform capability both backends satisfy.
#[async_trait]
pub trait RadioBackend: Send + Sync {
    /// Transmit 1..=255 bytes and wait for the outcome.
    async fn transmit(&self, payload: Vec<u8>) -> Result<TxOutcome, LinkError>;

    /// Arm reception; `0` means continuous.
    async fn receive_mode(&self, timeout_ms: u32) -> Result<(), LinkError>;

    /// Register an event subscriber. Never fails.
    fn subscribe(&self, id: SubscriberId, events: EventSender);

    /// Remove an event subscriber. Never fails.
    fn unsubscribe(&self, id: SubscriberId);

    /// Snapshot of the active radio parameters.
    async fn get_radio_settings(&self) -> Result<RadioConfig, LinkError>;

    /// Whether the backend currently holds its hardware.
    async fn connected(&self) -> bool;

    /// Release the hardware.
    async fn disconnect(&self) -> Result<(), LinkError>;
}

/// The backend selected for this process run.
#[derive(Clone)]
pub enum RadioHandle {
    Sx1276(Sx1276Handle),
    Rn2903(Rn2903Handle),
}

impl RadioHandle {
    /// Open the backend named by the configuration and bring it up with
    /// the configured radio parameters.
    pub async fn connect(config: &AppConfig) -> Result<Self, LinkError> {
        let radio_config = config.radio_config();
        match config.lora_backend {
            Backend::Sx1276 => Self::connect_sx1276(config, radio_config).await,
            Backend::Rn2903 => {
                let port = transport::open(&config.serial_port).await?;
                let handle = Rn2903Handle::connect(port, radio_config).await?;
                Ok(RadioHandle::Rn2903(handle))
            }
        }
    }

    #[cfg(feature = "raspberry-pi")]
    async fn connect_sx1276(
        config: &AppConfig,
        radio_config: RadioConfig,
    ) -> Result<Self, LinkError> {
        use crate::radio::sx1276::{DraginoHal, DraginoPins};

        let pins = DraginoPins {
            spi_bus: config.spi_bus.clone(),
            spi_speed_hz: config.spi_speed_hz,
            reset_pin: config.reset_pin,
            cs_pin: config.cs_pin,
            dio0_pin: config.dio0_pin,
        };
        let (hal, dio0) = DraginoHal::open(&pins).map_err(|e| LinkError::io("hal open", e))?;
        let handle = Sx1276Handle::start(hal, dio0, radio_config).await?;
        Ok(RadioHandle::Sx1276(handle))
    }

    #[cfg(not(feature = "raspberry-pi"))]
    async fn connect_sx1276(
        _config: &AppConfig,
        _radio_config: RadioConfig,
    ) -> Result<Self, LinkError> {
        Err(LinkError::InvalidParam(
            "sx1276 backend requires the raspberry-pi feature".into(),
        ))
    }

    /// Backend name for logs and status output.
    pub fn backend_name(&self) -> &'static str {
        match self {
            RadioHandle::Sx1276(_) => "sx1276",
            RadioHandle::Rn2903(_) => "rn2903",
        }
    }

    /// Human-readable backend version (chip version byte or modem banner).
    pub async fn version(&self) -> Result<String, LinkError> {
        match self {
            RadioHandle::Sx1276(h) => Ok(format!("SX1276 silicon 0x{:02X}", h.get_version().await?)),
            RadioHandle::Rn2903(h) => h.get_version().await,
        }
    }
}

#[async_trait]
impl RadioBackend for RadioHandle {
    async fn transmit(&self, payload: Vec<u8>) -> Result<TxOutcome, LinkError> {
        match self {
            RadioHandle::Sx1276(h) => h.transmit(payload).await,
            RadioHandle::Rn2903(h) => h.transmit(payload).await,
        }
    }

    async fn receive_mode(&self, timeout_ms: u32) -> Result<(), LinkError> {
        match self {
            RadioHandle::Sx1276(h) => h.receive_mode(timeout_ms).await,
            RadioHandle::Rn2903(h) => h.receive_mode(timeout_ms).await,
        }
    }

    fn subscribe(&self, id: SubscriberId, events: EventSender) {
        match self {
            RadioHandle::Sx1276(h) => h.subscribe(id, events),
            RadioHandle::Rn2903(h) => h.subscribe(id, events),
        }
    }

    fn unsubscribe(&self, id: SubscriberId) {
        match self {
            RadioHandle::Sx1276(h) => h.unsubscribe(id),
            RadioHandle::Rn2903(h) => h.unsubscribe(id),
        }
    }

    async fn get_radio_settings(&self) -> Result<RadioConfig, LinkError> {
        match self {
            RadioHandle::Sx1276(h) => h.settings().await,
            RadioHandle::Rn2903(h) => h.settings().await,
        }
    }

    async fn connected(&self) -> bool {
        match self {
            RadioHandle::Sx1276(h) => h.connected().await,
            RadioHandle::Rn2903(h) => h.connected().await,
        }
    }

    async fn disconnect(&self) -> Result<(), LinkError> {
        match self {
            RadioHandle::Sx1276(h) => h.disconnect().await,
            RadioHandle::Rn2903(h) => h.disconnect().await,
        }
    }
}
