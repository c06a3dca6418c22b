//! # RN2903 Response-Line Grammar
//!
//! The modem talks in CRLF-terminated ASCII lines. Replies to commands and
//! asynchronous notifications share the same channel and are told apart by
//! their leading token. This module classifies one line.
//!
//! Recognized forms:
//!
//! ```text
//! radio_rx <hex>     received frame, hex payload (case-insensitive)
//! radio_tx_ok        transmission completed
//! radio_err          transmission or reception failed
//! invalid_param      command rejected
//! busy               radio occupied
//! ok                 command accepted
//! RN2903 X.Y.Z ...   version banner
//! ```

use nom::bytes::complete::tag;
use nom::character::complete::{hex_digit1, space1};
use nom::combinator::all_consuming;
use nom::sequence::{preceded, tuple};
use nom::IResult;

use crate::util::hex::decode_hex;

/// One classified modem line.
#[derive(Debug, Clone, PartialEq)]
pub enum ModemLine {
    /// `radio_rx <hex>` with a well-formed payload of 1..=255 bytes.
    RadioRx(Vec<u8>),
    /// `radio_rx` whose payload failed hex decoding; dropped locally.
    RadioRxBadHex(String),
    /// `radio_tx_ok`
    RadioTxOk,
    /// `radio_err`
    RadioErr,
    /// `invalid_param`
    InvalidParam,
    /// `busy`
    Busy,
    /// `ok`
    Ack,
    /// Version banner starting with `RN`.
    Version(String),
    /// Anything else (e.g. the pause budget printed by `mac pause`).
    Other(String),
}

fn radio_rx_payload(input: &str) -> IResult<&str, &str> {
    all_consuming(preceded(tuple((tag("radio_rx"), space1)), hex_digit1))(input)
}

/// Classify one line (already stripped of its CRLF terminator).
pub fn parse_line(line: &str) -> ModemLine {
    let line = line.trim();
    match line {
        "radio_tx_ok" => return ModemLine::RadioTxOk,
        "radio_err" => return ModemLine::RadioErr,
        "invalid_param" => return ModemLine::InvalidParam,
        "busy" => return ModemLine::Busy,
        "ok" => return ModemLine::Ack,
        _ => {}
    }

    if line.starts_with("radio_rx") {
        return match radio_rx_payload(line) {
            Ok((_, hex)) => match decode_hex(hex) {
                Ok(bytes) if (1..=255).contains(&bytes.len()) => ModemLine::RadioRx(bytes),
                _ => ModemLine::RadioRxBadHex(line.to_string()),
            },
            Err(_) => ModemLine::RadioRxBadHex(line.to_string()),
        };
    }

    if line.starts_with("RN") {
        return ModemLine::Version(line.to_string());
    }

    ModemLine::Other(line.to_string())
}
