//! # SX1276 Register Definitions and Constants
//!
//! Register addresses, operating-mode values and IRQ bits for the Semtech
//! SX1276 in LoRa mode, limited to the subset this driver programs. All
//! values follow the SX1276/77/78/79 datasheet register tables.
//!
//! ## Register Map
//!
//! - 0x00-0x10: FIFO access, operating mode, carrier frequency, PA
//! - 0x12-0x1B: IRQ flags, RX bookkeeping, packet RSSI/SNR
//! - 0x1D-0x26: modem configuration, preamble, payload length
//! - 0x31-0x42: detection tuning, sync word, DIO mapping, version
//! - 0x4D: high-power PA DAC

use bitflags::bitflags;

// =============================================================================
// Register addresses
// =============================================================================

/// FIFO read/write access register
pub const REG_FIFO: u8 = 0x00;

/// Operating mode and LoRa/FSK selection
pub const REG_OP_MODE: u8 = 0x01;

/// RF carrier frequency (MSB)
pub const REG_FRF_MSB: u8 = 0x06;

/// RF carrier frequency (MID)
pub const REG_FRF_MID: u8 = 0x07;

/// RF carrier frequency (LSB)
pub const REG_FRF_LSB: u8 = 0x08;

/// PA selection and output power
pub const REG_PA_CONFIG: u8 = 0x09;

/// Over-current protection control
pub const REG_OCP: u8 = 0x0B;

/// LNA gain and boost
pub const REG_LNA: u8 = 0x0C;

/// FIFO SPI access pointer
pub const REG_FIFO_ADDR_PTR: u8 = 0x0D;

/// FIFO TX base address
pub const REG_FIFO_TX_BASE_ADDR: u8 = 0x0E;

/// FIFO RX base address
pub const REG_FIFO_RX_BASE_ADDR: u8 = 0x0F;

/// Start address of the last received packet
pub const REG_FIFO_RX_CURRENT_ADDR: u8 = 0x10;

/// IRQ flags (write 1 to clear)
pub const REG_IRQ_FLAGS: u8 = 0x12;

/// Number of payload bytes of the last packet
pub const REG_RX_NB_BYTES: u8 = 0x13;

/// SNR of the last packet (signed, quarter dB)
pub const REG_PKT_SNR_VALUE: u8 = 0x19;

/// RSSI of the last packet
pub const REG_PKT_RSSI_VALUE: u8 = 0x1A;

/// Current RSSI
pub const REG_RSSI_VALUE: u8 = 0x1B;

/// Bandwidth, coding rate, header mode
pub const REG_MODEM_CONFIG_1: u8 = 0x1D;

/// Spreading factor, CRC enable
pub const REG_MODEM_CONFIG_2: u8 = 0x1E;

/// Preamble length (MSB)
pub const REG_PREAMBLE_MSB: u8 = 0x20;

/// Preamble length (LSB)
pub const REG_PREAMBLE_LSB: u8 = 0x21;

/// Payload length for TX (and implicit-header RX)
pub const REG_PAYLOAD_LENGTH: u8 = 0x22;

/// LNA gain control, AGC auto
pub const REG_MODEM_CONFIG_3: u8 = 0x26;

/// Detection optimize (SF6 vs SF7-12)
pub const REG_DETECTION_OPTIMIZE: u8 = 0x31;

/// Detection threshold (SF6 vs SF7-12)
pub const REG_DETECTION_THRESHOLD: u8 = 0x37;

/// LoRa sync word
pub const REG_SYNC_WORD: u8 = 0x39;

/// DIO0..DIO3 mapping
pub const REG_DIO_MAPPING_1: u8 = 0x40;

/// Chip version (read-only)
pub const REG_VERSION: u8 = 0x42;

/// High-power PA DAC enable
pub const REG_PA_DAC: u8 = 0x4D;

// =============================================================================
// Operating modes
// =============================================================================

/// Long-range (LoRa) mode bit, ORed into every mode write.
pub const MODE_LONG_RANGE: u8 = 0x80;

pub const MODE_SLEEP: u8 = 0x00;
pub const MODE_STANDBY: u8 = 0x01;
pub const MODE_TX: u8 = 0x03;
pub const MODE_RX_CONTINUOUS: u8 = 0x05;
pub const MODE_RX_SINGLE: u8 = 0x06;

// =============================================================================
// Fixed register values
// =============================================================================

/// Expected REG_VERSION readback for the SX1276 family.
pub const CHIP_VERSION: u8 = 0x12;

/// LNA boost bits ORed into REG_LNA at init.
pub const LNA_BOOST: u8 = 0x03;

/// Auto AGC in modem config 3.
pub const AGC_AUTO_ON: u8 = 0x04;

/// Detection optimize / threshold pairs. SF6 needs its own constants.
pub const DETECTION_OPTIMIZE_SF6: u8 = 0xC5;
pub const DETECTION_THRESHOLD_SF6: u8 = 0x0C;
pub const DETECTION_OPTIMIZE_SF7_12: u8 = 0xC3;
pub const DETECTION_THRESHOLD_SF7_12: u8 = 0x0A;

/// PA DAC values: default (up to +17 dBm) and high power (+20 dBm).
pub const PA_DAC_DEFAULT: u8 = 0x84;
pub const PA_DAC_HIGH_POWER: u8 = 0x87;

/// Over-current protection trims: 100 mA and 240 mA.
pub const OCP_100_MA: u8 = 0x2B;
pub const OCP_240_MA: u8 = 0x3F;

/// PA_BOOST output select in REG_PA_CONFIG.
pub const PA_BOOST: u8 = 0x80;

/// DIO0 mapped to RxDone/TxDone (mapping value 00 in bits 7:6).
pub const DIO0_RX_TX_DONE: u8 = 0x00;

/// Packet RSSI offset for the HF port (868/915 MHz).
pub const RSSI_OFFSET_HF: i16 = -157;

// =============================================================================
// IRQ flags
// =============================================================================

bitflags! {
    /// LoRa IRQ flag register bits (REG_IRQ_FLAGS).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        const CAD_DETECTED        = 0x01;
        const FHSS_CHANGE_CHANNEL = 0x02;
        const CAD_DONE            = 0x04;
        const TX_DONE             = 0x08;
        const VALID_HEADER        = 0x10;
        const PAYLOAD_CRC_ERROR   = 0x20;
        const RX_DONE             = 0x40;
        const RX_TIMEOUT          = 0x80;
    }
}

// =============================================================================
// Carrier frequency conversion
// =============================================================================

/// Crystal oscillator frequency.
pub const F_XOSC: u32 = 32_000_000;

/// Synthesizer step: F_XOSC / 2^19 ≈ 61.035 Hz.
pub const FRF_DIVIDER: u64 = 1 << 19;

/// Convert a carrier frequency in Hz to the 24-bit Frf register value.
pub fn frf_from_hz(frequency_hz: u32) -> u32 {
    // round(freq / (F_XOSC / 2^19)) without losing the fractional step
    let num = (frequency_hz as u64) * FRF_DIVIDER + (F_XOSC as u64 / 2);
    (num / F_XOSC as u64) as u32
}

/// Convert a 24-bit Frf register value back to Hz.
pub fn hz_from_frf(frf: u32) -> u32 {
    ((frf as u64 * F_XOSC as u64 + FRF_DIVIDER / 2) / FRF_DIVIDER) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frf_roundtrip_within_one_step() {
        // One synthesizer step is about 61 Hz.
        let step = (F_XOSC as u64 / FRF_DIVIDER) as u32 + 1;
        for hz in [137_000_000u32, 433_050_000, 868_100_000, 915_000_000, 1_020_000_000] {
            let back = hz_from_frf(frf_from_hz(hz));
            let diff = hz.abs_diff(back);
            assert!(diff <= step, "{hz} -> {back}, off by {diff}");
        }
    }

    #[test]
    fn test_frf_known_value() {
        // 915 MHz: 915e6 * 2^19 / 32e6 = 14991360.
        assert_eq!(frf_from_hz(915_000_000), 14_991_360);
        assert_eq!(hz_from_frf(14_991_360), 915_000_000);
    }

    #[test]
    fn test_irq_flags_decode() {
        let flags = IrqFlags::from_bits_truncate(0x60);
        assert!(flags.contains(IrqFlags::RX_DONE));
        assert!(flags.contains(IrqFlags::PAYLOAD_CRC_ERROR));
        assert!(!flags.contains(IrqFlags::TX_DONE));
    }
}
