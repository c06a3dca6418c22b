//! # RN2903 Backend
//!
//! AT-style driver for the Microchip RN2903 LoRa modem over a serial
//! line: CRLF-framed transport ([`transport`]), response-line grammar
//! ([`proto`]) and the modem actor ([`modem`]).

pub mod modem;
pub mod proto;
pub mod transport;

pub use modem::Rn2903Handle;
