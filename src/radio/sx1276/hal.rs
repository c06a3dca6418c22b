//! # SX1276 Hardware Access
//!
//! Register-level access to the SX1276 plus the GPIO surface around it:
//! a manually driven chip-select line, the hardware reset line, and the
//! DIO0 interrupt input.
//!
//! The [`Sx1276Hal`] trait is the seam the driver is generic over; tests
//! substitute a recording register map. [`DraginoHal`] is the Raspberry Pi
//! implementation for the Dragino LoRa HAT, where NSS is wired to a plain
//! GPIO rather than the SPI controller's CE0, so every register access
//! drives chip select by hand:
//!
//! ```text
//! CS low → clock [addr | 0x80 for write, addr for read] [value] → CS high
//! ```
//!
//! DIO0 rising edges are not handled in the interrupt callback. The
//! callback only pumps an edge token into a channel; the driver actor reads
//! the IRQ register from its own loop so flag reads stay serialized with
//! mode transitions.

use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by the hardware access layer.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("SPI error: {0}")]
    Spi(String),

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("invalid hardware configuration: {0}")]
    InvalidConfig(String),
}

/// Register access MSB: set for write transfers, clear for reads.
pub const WRITE_ACCESS: u8 = 0x80;

/// Receiving end of the DIO0 edge pump. One token per rising edge.
pub type Dio0Edges = mpsc::UnboundedReceiver<()>;

/// Register-level view of the SX1276 used by the driver.
///
/// Implementations own the SPI handle and all three GPIO lines for their
/// whole lifetime; dropping the HAL closes them.
pub trait Sx1276Hal: Send + 'static {
    /// Read one 8-bit register.
    fn read_register(&mut self, addr: u8) -> Result<u8, HalError>;

    /// Write one 8-bit register.
    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError>;

    /// Drive the hardware reset line. Reset is active low; pulse timing is
    /// owned by the driver.
    fn set_reset(&mut self, high: bool) -> Result<(), HalError>;
}

#[cfg(feature = "raspberry-pi")]
pub use raspberry_pi::{DraginoHal, DraginoPins};

#[cfg(feature = "raspberry-pi")]
mod raspberry_pi {
    use super::{Dio0Edges, HalError, Sx1276Hal, WRITE_ACCESS};
    use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
    use rppal::spi::{BitOrder, Bus, Mode, SlaveSelect, Spi};
    use tokio::sync::mpsc;

    /// Wiring of the Dragino HAT on the 40-pin header (BCM numbering).
    #[derive(Debug, Clone)]
    pub struct DraginoPins {
        /// SPI device identifier, e.g. `spidev0.0`.
        pub spi_bus: String,
        /// SPI clock in Hz (mode 0, MSB first; the chip takes up to 8 MHz).
        pub spi_speed_hz: u32,
        /// Reset line (output, active low).
        pub reset_pin: u8,
        /// Chip select line (output, active low, driven manually).
        pub cs_pin: u8,
        /// DIO0 line (input, rising-edge interrupt, RxDone/TxDone).
        pub dio0_pin: u8,
    }

    impl Default for DraginoPins {
        fn default() -> Self {
            Self {
                spi_bus: "spidev0.0".to_string(),
                spi_speed_hz: 8_000_000,
                reset_pin: 17,
                cs_pin: 25,
                dio0_pin: 4,
            }
        }
    }

    /// Map a `spidevB.S` identifier onto rppal's bus/slave-select pair.
    fn parse_spi_bus(ident: &str) -> Result<(Bus, SlaveSelect), HalError> {
        match ident {
            "spidev0.0" => Ok((Bus::Spi0, SlaveSelect::Ss0)),
            "spidev0.1" => Ok((Bus::Spi0, SlaveSelect::Ss1)),
            "spidev1.0" => Ok((Bus::Spi1, SlaveSelect::Ss0)),
            "spidev1.1" => Ok((Bus::Spi1, SlaveSelect::Ss1)),
            "spidev1.2" => Ok((Bus::Spi1, SlaveSelect::Ss2)),
            other => Err(HalError::InvalidConfig(format!(
                "unsupported SPI device {other:?}"
            ))),
        }
    }

    /// Raspberry Pi HAL for the Dragino LoRa HAT.
    pub struct DraginoHal {
        spi: Spi,
        cs: OutputPin,
        reset: OutputPin,
        // Held for its interrupt registration; dropping it disables DIO0.
        _dio0: InputPin,
    }

    impl DraginoHal {
        /// Open SPI and the three GPIO lines, and arm the DIO0 rising-edge
        /// interrupt. Edges arrive as tokens on the returned channel.
        ///
        /// Handles are acquired in order SPI, reset, chip select, DIO0; an
        /// error part-way through drops the already-opened handles in
        /// reverse order.
        pub fn open(pins: &DraginoPins) -> Result<(Self, Dio0Edges), HalError> {
            let (bus, slave_select) = parse_spi_bus(&pins.spi_bus)?;
            let spi = Spi::new(bus, slave_select, pins.spi_speed_hz, Mode::Mode0)
                .map_err(|e| HalError::Spi(e.to_string()))?;
            spi.set_bit_order(BitOrder::MsbFirst)
                .map_err(|e| HalError::Spi(e.to_string()))?;

            let gpio = Gpio::new().map_err(|e| HalError::Gpio(e.to_string()))?;

            let reset = gpio
                .get(pins.reset_pin)
                .map_err(|e| HalError::Gpio(e.to_string()))?
                .into_output_low();

            let mut cs = gpio
                .get(pins.cs_pin)
                .map_err(|e| HalError::Gpio(e.to_string()))?
                .into_output();
            cs.set_high();

            let mut dio0 = gpio
                .get(pins.dio0_pin)
                .map_err(|e| HalError::Gpio(e.to_string()))?
                .into_input();

            let (edge_tx, edge_rx) = mpsc::unbounded_channel();
            dio0.set_async_interrupt(Trigger::RisingEdge, move |_level| {
                // Driver actor may already be gone during shutdown.
                let _ = edge_tx.send(());
            })
            .map_err(|e| HalError::Gpio(e.to_string()))?;

            log::info!("Dragino HAL initialized:");
            log::info!("  SPI: {} @ {} Hz", pins.spi_bus, pins.spi_speed_hz);
            log::info!("  RESET: GPIO {}", pins.reset_pin);
            log::info!("  CS: GPIO {}", pins.cs_pin);
            log::info!("  DIO0: GPIO {} (rising edge)", pins.dio0_pin);

            Ok((
                Self {
                    spi,
                    cs,
                    reset,
                    _dio0: dio0,
                },
                edge_rx,
            ))
        }

        /// One chip-select framed two-byte transfer. Returns the byte
        /// clocked out during the value phase.
        fn transfer(&mut self, addr: u8, value: u8) -> Result<u8, HalError> {
            let tx = [addr, value];
            let mut rx = [0u8; 2];
            self.cs.set_low();
            let result = self.spi.transfer(&mut rx, &tx);
            self.cs.set_high();
            result.map_err(|e| HalError::Spi(e.to_string()))?;
            Ok(rx[1])
        }
    }

    impl Sx1276Hal for DraginoHal {
        fn read_register(&mut self, addr: u8) -> Result<u8, HalError> {
            self.transfer(addr & !WRITE_ACCESS, 0x00)
        }

        fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError> {
            self.transfer(addr | WRITE_ACCESS, value)?;
            Ok(())
        }

        fn set_reset(&mut self, high: bool) -> Result<(), HalError> {
            if high {
                self.reset.set_high();
            } else {
                self.reset.set_low();
            }
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_parse_spi_bus() {
            assert!(parse_spi_bus("spidev0.0").is_ok());
            assert!(parse_spi_bus("spidev1.2").is_ok());
            assert!(matches!(
                parse_spi_bus("spidev2.0"),
                Err(HalError::InvalidConfig(_))
            ));
        }

        #[test]
        fn test_default_pins_match_hat_wiring() {
            let pins = DraginoPins::default();
            assert_eq!(pins.reset_pin, 17);
            assert_eq!(pins.cs_pin, 25);
            assert_eq!(pins.dio0_pin, 4);
            assert_eq!(pins.spi_speed_hz, 8_000_000);
        }
    }
}
