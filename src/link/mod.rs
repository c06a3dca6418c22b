//! # Link Modes
//!
//! The two coordinated exercise modes built on top of the radio facade:
//! a periodic [`beacon`] transmitter and a receive-and-echo [`echo`]
//! responder that turns the half-duplex radio around on every packet.

pub mod beacon;
pub mod echo;

pub use beacon::{BeaconHandle, BeaconOptions, BeaconStats};
pub use echo::{EchoHandle, EchoOptions, EchoStats};
