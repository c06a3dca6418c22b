//! # SX1276 Backend
//!
//! Register-level half-duplex driver for the Semtech SX1276 in LoRa mode,
//! split into the register/GPIO access layer ([`hal`]), the register map
//! ([`registers`]) and the driver actor ([`driver`]).

pub mod driver;
pub mod hal;
pub mod registers;

pub use driver::Sx1276Handle;
pub use hal::{Dio0Edges, HalError, Sx1276Hal};
#[cfg(feature = "raspberry-pi")]
pub use hal::{DraginoHal, DraginoPins};
