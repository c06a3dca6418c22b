//! # SX1276 Driver Actor
//!
//! The radio state machine: bring-up sequence, parameter setters,
//! transmit, receive arming and DIO0 dispatch. The driver runs as a single
//! tokio task that exclusively owns the HAL (SPI handle, chip select,
//! reset, DIO0) and serializes every register access with every mode
//! transition.
//!
//! The chip is half duplex. The driver enforces the discipline the link
//! modes rely on: standby before every parameter change and every TX/RX
//! setup, and an IRQ-register read on every DIO0 edge so an edge that
//! races a mode transition is dispatched on the flags actually set, not on
//! the mode the driver thinks it is in.
//!
//! Transmit suspends the caller. Completion is detected by polling the IRQ
//! register every 10 ms, or sooner when a DIO0 edge arrives, with a 5 s
//! budget. The driver has no other work while a transmission is in
//! flight, so blocking its own loop here is deliberate.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot;
use tokio::time::{sleep, Instant};

use crate::actor::{mailbox, Inbox, Mailbox};
use crate::error::LinkError;
use crate::radio::sx1276::hal::{Dio0Edges, Sx1276Hal};
use crate::radio::sx1276::registers::*;
use crate::radio::{
    bandwidth_index, EventSender, RadioConfig, RadioEvent, RadioMode, RxFrame, SubscriberId,
    TxOutcome,
};

/// Deadline for ordinary request/reply calls into the actor.
const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for transmit calls: the 5 s on-air budget plus slack for a
/// busy inbox.
const TX_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// On-air transmit budget.
const TX_BUDGET: Duration = Duration::from_secs(5);

/// IRQ poll period while a transmission is in flight.
const TX_POLL: Duration = Duration::from_millis(10);

/// Reset pulse width and post-sleep LoRa latch delay.
const SETTLE: Duration = Duration::from_millis(10);

type Reply<T> = oneshot::Sender<Result<T, LinkError>>;

#[derive(Debug)]
enum Command {
    Transmit { payload: Vec<u8>, reply: Reply<TxOutcome> },
    ReceiveMode { timeout_ms: u32, reply: Reply<()> },
    SetFrequency { hz: u32, reply: Reply<()> },
    SetSpreadingFactor { sf: u8, reply: Reply<()> },
    SetBandwidth { hz: u32, reply: Reply<()> },
    SetCodingRate { denominator: u8, reply: Reply<()> },
    SetTxPower { dbm: u8, reply: Reply<()> },
    SetSyncWord { word: u8, reply: Reply<()> },
    Standby { reply: Reply<()> },
    Sleep { reply: Reply<()> },
    HardwareReset { reply: Reply<()> },
    Disconnect { reply: Reply<()> },
    GetRssi { reply: Reply<i16> },
    GetVersion { reply: Reply<u8> },
    Settings { reply: Reply<RadioConfig> },
    Connected { reply: oneshot::Sender<bool> },
    Subscribe { id: SubscriberId, events: EventSender },
    Unsubscribe { id: SubscriberId },
}

/// Cloneable handle to a running SX1276 driver actor.
#[derive(Clone, Debug)]
pub struct Sx1276Handle {
    mailbox: Mailbox<Command>,
}

impl Sx1276Handle {
    /// Bring up the chip behind `hal` and spawn the driver actor.
    ///
    /// Runs the full initialization sequence (reset pulse, version check,
    /// LoRa sleep latch, carrier programming, defaults from `config`,
    /// standby). On any failure the HAL is dropped, closing every handle
    /// it owns, and the error is returned.
    pub async fn start<H: Sx1276Hal>(
        hal: H,
        dio0: Dio0Edges,
        config: RadioConfig,
    ) -> Result<Self, LinkError> {
        config.validate()?;

        let mut driver = Driver {
            hal: Some(hal),
            config,
            mode: RadioMode::Sleep,
            connected: false,
            version: 0,
            subscribers: HashMap::new(),
        };
        driver.begin().await?;

        let (mb, inbox) = mailbox();
        tokio::spawn(driver.run(inbox, dio0));
        Ok(Self { mailbox: mb })
    }

    /// Transmit a payload of 1..=255 bytes, waiting for completion.
    pub async fn transmit(&self, payload: Vec<u8>) -> Result<TxOutcome, LinkError> {
        self.mailbox
            .call(|reply| Command::Transmit { payload, reply }, TX_CALL_TIMEOUT)
            .await?
    }

    /// Arm the receiver; `0` selects continuous mode, anything else a
    /// single-packet window.
    pub async fn receive_mode(&self, timeout_ms: u32) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::ReceiveMode { timeout_ms, reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn set_frequency(&self, hz: u32) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::SetFrequency { hz, reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn set_spreading_factor(&self, sf: u8) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::SetSpreadingFactor { sf, reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn set_bandwidth(&self, hz: u32) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::SetBandwidth { hz, reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn set_coding_rate(&self, denominator: u8) -> Result<(), LinkError> {
        self.mailbox
            .call(
                |reply| Command::SetCodingRate { denominator, reply },
                CALL_TIMEOUT,
            )
            .await?
    }

    pub async fn set_tx_power(&self, dbm: u8) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::SetTxPower { dbm, reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn set_sync_word(&self, word: u8) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::SetSyncWord { word, reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn standby(&self) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::Standby { reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn sleep(&self) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::Sleep { reply }, CALL_TIMEOUT)
            .await?
    }

    /// Pulse the reset line and re-run the full initialization sequence.
    pub async fn hardware_reset(&self) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::HardwareReset { reply }, CALL_TIMEOUT)
            .await?
    }

    /// Put the chip to sleep and release the SPI/GPIO handles.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Command::Disconnect { reply }, CALL_TIMEOUT)
            .await?
    }

    /// Current RSSI in dBm.
    pub async fn get_rssi(&self) -> Result<i16, LinkError> {
        self.mailbox
            .call(|reply| Command::GetRssi { reply }, CALL_TIMEOUT)
            .await?
    }

    /// Chip version byte read during bring-up (0x12 for the SX1276).
    pub async fn get_version(&self) -> Result<u8, LinkError> {
        self.mailbox
            .call(|reply| Command::GetVersion { reply }, CALL_TIMEOUT)
            .await?
    }

    /// Snapshot of the active radio parameters.
    pub async fn settings(&self) -> Result<RadioConfig, LinkError> {
        self.mailbox
            .call(|reply| Command::Settings { reply }, CALL_TIMEOUT)
            .await?
    }

    pub async fn connected(&self) -> bool {
        self.mailbox
            .call(|reply| Command::Connected { reply }, CALL_TIMEOUT)
            .await
            .unwrap_or(false)
    }

    /// Register an event subscriber. Never fails; a dead driver simply
    /// delivers nothing.
    pub fn subscribe(&self, id: SubscriberId, events: EventSender) {
        self.mailbox.cast(Command::Subscribe { id, events });
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.mailbox.cast(Command::Unsubscribe { id });
    }
}

struct Driver<H: Sx1276Hal> {
    hal: Option<H>,
    config: RadioConfig,
    mode: RadioMode,
    connected: bool,
    version: u8,
    subscribers: HashMap<SubscriberId, EventSender>,
}

impl<H: Sx1276Hal> Driver<H> {
    async fn run(mut self, mut inbox: Inbox<Command>, mut dio0: Dio0Edges) {
        loop {
            tokio::select! {
                cmd = inbox.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd, &mut dio0).await,
                    None => break,
                },
                Some(()) = dio0.recv() => self.handle_dio0_edge(),
            }
        }
        debug!("SX1276 driver actor stopped");
    }

    async fn handle_command(&mut self, cmd: Command, dio0: &mut Dio0Edges) {
        match cmd {
            Command::Transmit { payload, reply } => {
                let _ = reply.send(self.transmit(payload, dio0).await);
            }
            Command::ReceiveMode { timeout_ms, reply } => {
                let _ = reply.send(self.receive_mode(timeout_ms));
            }
            Command::SetFrequency { hz, reply } => {
                let _ = reply.send(self.set_frequency(hz));
            }
            Command::SetSpreadingFactor { sf, reply } => {
                let _ = reply.send(self.set_spreading_factor(sf));
            }
            Command::SetBandwidth { hz, reply } => {
                let _ = reply.send(self.set_bandwidth(hz));
            }
            Command::SetCodingRate { denominator, reply } => {
                let _ = reply.send(self.set_coding_rate(denominator));
            }
            Command::SetTxPower { dbm, reply } => {
                let _ = reply.send(self.set_tx_power(dbm));
            }
            Command::SetSyncWord { word, reply } => {
                let _ = reply.send(self.set_sync_word(word));
            }
            Command::Standby { reply } => {
                let _ = reply.send(self.request_mode(RadioMode::Standby));
            }
            Command::Sleep { reply } => {
                let _ = reply.send(self.request_mode(RadioMode::Sleep));
            }
            Command::HardwareReset { reply } => {
                let _ = reply.send(self.begin().await);
            }
            Command::Disconnect { reply } => {
                let _ = reply.send(self.disconnect());
            }
            Command::GetRssi { reply } => {
                let _ = reply.send(self.get_rssi());
            }
            Command::GetVersion { reply } => {
                let result = self.ensure_connected().map(|_| self.version);
                let _ = reply.send(result);
            }
            Command::Settings { reply } => {
                let _ = reply.send(Ok(self.config.clone()));
            }
            Command::Connected { reply } => {
                let _ = reply.send(self.connected);
            }
            Command::Subscribe { id, events } => {
                self.subscribers.insert(id, events);
            }
            Command::Unsubscribe { id } => {
                self.subscribers.remove(&id);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Bring-up
    // ---------------------------------------------------------------------

    /// Full initialization sequence. Leaves the chip in standby with the
    /// configured parameters applied, or returns the first error.
    async fn begin(&mut self) -> Result<(), LinkError> {
        self.connected = false;

        // Reset pulse: low 10 ms, high 10 ms.
        self.reset_line(false)?;
        sleep(SETTLE).await;
        self.reset_line(true)?;
        sleep(SETTLE).await;

        let version = self.reg_read(REG_VERSION)?;
        if version != CHIP_VERSION {
            return Err(LinkError::InvalidChip(version));
        }
        self.version = version;

        // The LoRa mode bit only latches while the chip sleeps.
        self.set_mode(RadioMode::Sleep)?;
        sleep(SETTLE).await;

        self.write_frf(self.config.frequency_hz)?;

        self.reg_write(REG_FIFO_TX_BASE_ADDR, 0x00)?;
        self.reg_write(REG_FIFO_RX_BASE_ADDR, 0x00)?;

        let lna = self.reg_read(REG_LNA)?;
        self.reg_write(REG_LNA, lna | LNA_BOOST)?;
        self.reg_write(REG_MODEM_CONFIG_3, AGC_AUTO_ON)?;

        self.apply_tx_power(self.config.tx_power_dbm)?;
        self.apply_spreading_factor(self.config.spreading_factor)?;
        self.apply_bandwidth(self.config.bandwidth_hz)?;
        self.apply_coding_rate(self.config.coding_rate)?;
        self.apply_crc(self.config.crc_on)?;
        self.apply_header_mode(self.config.implicit_header)?;
        self.apply_preamble(self.config.preamble_len)?;
        self.reg_write(REG_SYNC_WORD, self.config.sync_word)?;

        self.set_mode(RadioMode::Standby)?;
        self.connected = true;

        info!(
            "SX1276 up: version 0x{:02X}, {} Hz, SF{}, {} Hz BW, CR 4/{}, {} dBm, sync 0x{:02X}",
            self.version,
            self.config.frequency_hz,
            self.config.spreading_factor,
            self.config.bandwidth_hz,
            self.config.coding_rate,
            self.config.tx_power_dbm,
            self.config.sync_word
        );
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), LinkError> {
        if self.hal.is_some() {
            // Best effort; the handles close regardless.
            let _ = self.set_mode(RadioMode::Sleep);
        }
        self.hal = None;
        self.connected = false;
        info!("SX1276 disconnected, handles released");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Transmit / receive
    // ---------------------------------------------------------------------

    async fn transmit(
        &mut self,
        payload: Vec<u8>,
        dio0: &mut Dio0Edges,
    ) -> Result<TxOutcome, LinkError> {
        if payload.is_empty() || payload.len() > 255 {
            return Err(LinkError::InvalidParam(format!(
                "payload length {} out of range 1..=255",
                payload.len()
            )));
        }
        self.ensure_connected()?;

        self.set_mode(RadioMode::Standby)?;
        self.reg_write(REG_FIFO_ADDR_PTR, 0x00)?;
        for &byte in &payload {
            self.reg_write(REG_FIFO, byte)?;
        }
        self.reg_write(REG_PAYLOAD_LENGTH, payload.len() as u8)?;
        self.reg_write(REG_IRQ_FLAGS, 0xFF)?;
        self.set_mode(RadioMode::Tx)?;

        debug!("TX start: {} bytes", payload.len());
        let deadline = Instant::now() + TX_BUDGET;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = sleep(TX_POLL.min(remaining)) => {}
                Some(()) = dio0.recv() => {}
            }

            let flags = IrqFlags::from_bits_truncate(self.reg_read(REG_IRQ_FLAGS)?);
            if flags.contains(IrqFlags::TX_DONE) {
                self.reg_write(REG_IRQ_FLAGS, IrqFlags::TX_DONE.bits())?;
                self.set_mode(RadioMode::Standby)?;
                debug!("TX done");
                self.emit(RadioEvent::TxDone);
                return Ok(TxOutcome::Ok);
            }
        }

        warn!("TX timeout after {:?}", TX_BUDGET);
        let _ = self.reg_write(REG_IRQ_FLAGS, 0xFF);
        let _ = self.set_mode(RadioMode::Standby);
        self.emit(RadioEvent::TxError);
        Ok(TxOutcome::Timeout)
    }

    fn receive_mode(&mut self, timeout_ms: u32) -> Result<(), LinkError> {
        self.ensure_connected()?;

        self.set_mode(RadioMode::Standby)?;
        self.reg_write(REG_FIFO_ADDR_PTR, 0x00)?;
        self.reg_write(REG_IRQ_FLAGS, 0xFF)?;
        self.reg_write(REG_DIO_MAPPING_1, DIO0_RX_TX_DONE)?;
        if timeout_ms == 0 {
            self.set_mode(RadioMode::RxContinuous)?;
        } else {
            self.set_mode(RadioMode::RxSingle)?;
        }
        debug!(
            "RX armed ({})",
            if timeout_ms == 0 { "continuous" } else { "single" }
        );
        Ok(())
    }

    /// DIO0 rising edge. The same line signals RxDone and TxDone, and an
    /// edge can race a mode transition, so dispatch happens on the IRQ
    /// bits actually observed rather than on the current mode.
    fn handle_dio0_edge(&mut self) {
        if self.hal.is_none() {
            return;
        }
        let flags = match self.reg_read(REG_IRQ_FLAGS) {
            Ok(raw) => IrqFlags::from_bits_truncate(raw),
            Err(e) => {
                warn!("DIO0 edge: IRQ register read failed: {e}");
                return;
            }
        };

        if flags.contains(IrqFlags::RX_DONE) {
            if flags.contains(IrqFlags::PAYLOAD_CRC_ERROR) {
                debug!("RX frame dropped: payload CRC error");
                let _ = self.reg_write(
                    REG_IRQ_FLAGS,
                    (IrqFlags::RX_DONE | IrqFlags::PAYLOAD_CRC_ERROR).bits(),
                );
            } else {
                match self.read_frame() {
                    Ok(frame) => {
                        debug!(
                            "RX frame: {} bytes, rssi {:?}, snr {:?}",
                            frame.bytes.len(),
                            frame.rssi_dbm,
                            frame.snr_db
                        );
                        self.emit(RadioEvent::Frame(frame));
                    }
                    Err(e) => warn!("RX frame read failed: {e}"),
                }
                let _ = self.reg_write(REG_IRQ_FLAGS, IrqFlags::RX_DONE.bits());
            }
            if self.mode == RadioMode::RxSingle {
                // The chip falls back to standby after a single packet.
                self.mode = RadioMode::Standby;
            }
        } else if !flags.is_empty() {
            // Spurious relative to what we are waiting for; clear what is
            // set and nothing more.
            let _ = self.reg_write(REG_IRQ_FLAGS, flags.bits());
            if flags.contains(IrqFlags::RX_TIMEOUT) && self.mode == RadioMode::RxSingle {
                self.mode = RadioMode::Standby;
            }
        }
    }

    /// Read the packet the chip just finished receiving, one FIFO byte per
    /// SPI transfer. Burst FIFO reads are untested on this part.
    fn read_frame(&mut self) -> Result<RxFrame, LinkError> {
        let current = self.reg_read(REG_FIFO_RX_CURRENT_ADDR)?;
        self.reg_write(REG_FIFO_ADDR_PTR, current)?;
        let count = self.reg_read(REG_RX_NB_BYTES)? as usize;

        let mut bytes = Vec::with_capacity(count);
        for _ in 0..count {
            bytes.push(self.reg_read(REG_FIFO)?);
        }

        let rssi = self.reg_read(REG_PKT_RSSI_VALUE)? as i16 + RSSI_OFFSET_HF;
        let snr_raw = self.reg_read(REG_PKT_SNR_VALUE)?;
        // Two's-complement quarter-dB.
        let snr = if snr_raw > 127 {
            (snr_raw as i16 - 256) as f32 / 4.0
        } else {
            snr_raw as f32 / 4.0
        };

        Ok(RxFrame {
            bytes,
            rssi_dbm: Some(rssi),
            snr_db: Some(snr),
        })
    }

    fn get_rssi(&mut self) -> Result<i16, LinkError> {
        self.ensure_connected()?;
        Ok(self.reg_read(REG_RSSI_VALUE)? as i16 + RSSI_OFFSET_HF)
    }

    // ---------------------------------------------------------------------
    // Parameter setters
    // ---------------------------------------------------------------------

    fn set_frequency(&mut self, hz: u32) -> Result<(), LinkError> {
        if !(137_000_000..=1_020_000_000).contains(&hz) {
            return Err(LinkError::InvalidParam(format!(
                "frequency {hz} Hz out of range 137..=1020 MHz"
            )));
        }
        self.with_standby(|d| {
            d.write_frf(hz)?;
            d.config.frequency_hz = hz;
            Ok(())
        })
    }

    fn set_spreading_factor(&mut self, sf: u8) -> Result<(), LinkError> {
        if !(6..=12).contains(&sf) {
            return Err(LinkError::InvalidParam(format!(
                "spreading factor {sf} out of range 6..=12"
            )));
        }
        self.with_standby(|d| {
            // SF6 only demodulates fixed-length packets.
            if sf == 6 && !d.config.implicit_header {
                d.apply_header_mode(true)?;
                d.config.implicit_header = true;
            }
            d.apply_spreading_factor(sf)?;
            d.config.spreading_factor = sf;
            Ok(())
        })
    }

    fn set_bandwidth(&mut self, hz: u32) -> Result<(), LinkError> {
        if bandwidth_index(hz).is_none() {
            return Err(LinkError::InvalidParam(format!(
                "unsupported bandwidth {hz} Hz"
            )));
        }
        self.with_standby(|d| {
            d.apply_bandwidth(hz)?;
            d.config.bandwidth_hz = hz;
            Ok(())
        })
    }

    fn set_coding_rate(&mut self, denominator: u8) -> Result<(), LinkError> {
        if !(5..=8).contains(&denominator) {
            return Err(LinkError::InvalidParam(format!(
                "coding rate 4/{denominator} out of range 4/5..=4/8"
            )));
        }
        self.with_standby(|d| {
            d.apply_coding_rate(denominator)?;
            d.config.coding_rate = denominator;
            Ok(())
        })
    }

    fn set_tx_power(&mut self, dbm: u8) -> Result<(), LinkError> {
        if !(2..=20).contains(&dbm) {
            return Err(LinkError::InvalidParam(format!(
                "TX power {dbm} dBm out of range 2..=20"
            )));
        }
        self.with_standby(|d| {
            d.apply_tx_power(dbm)?;
            d.config.tx_power_dbm = dbm;
            Ok(())
        })
    }

    fn set_sync_word(&mut self, word: u8) -> Result<(), LinkError> {
        self.with_standby(|d| {
            d.reg_write(REG_SYNC_WORD, word)?;
            d.config.sync_word = word;
            Ok(())
        })
    }

    fn request_mode(&mut self, mode: RadioMode) -> Result<(), LinkError> {
        self.ensure_connected()?;
        self.set_mode(mode)
    }

    /// Run a parameter change with the chip held in standby.
    fn with_standby(
        &mut self,
        apply: impl FnOnce(&mut Self) -> Result<(), LinkError>,
    ) -> Result<(), LinkError> {
        self.ensure_connected()?;
        self.set_mode(RadioMode::Standby)?;
        apply(self)
    }

    fn apply_spreading_factor(&mut self, sf: u8) -> Result<(), LinkError> {
        let cfg2 = self.reg_read(REG_MODEM_CONFIG_2)?;
        self.reg_write(REG_MODEM_CONFIG_2, (cfg2 & 0x0F) | (sf << 4))?;
        if sf == 6 {
            self.reg_write(REG_DETECTION_OPTIMIZE, DETECTION_OPTIMIZE_SF6)?;
            self.reg_write(REG_DETECTION_THRESHOLD, DETECTION_THRESHOLD_SF6)?;
        } else {
            self.reg_write(REG_DETECTION_OPTIMIZE, DETECTION_OPTIMIZE_SF7_12)?;
            self.reg_write(REG_DETECTION_THRESHOLD, DETECTION_THRESHOLD_SF7_12)?;
        }
        Ok(())
    }

    fn apply_bandwidth(&mut self, hz: u32) -> Result<(), LinkError> {
        let index = bandwidth_index(hz)
            .ok_or_else(|| LinkError::InvalidParam(format!("unsupported bandwidth {hz} Hz")))?;
        let cfg1 = self.reg_read(REG_MODEM_CONFIG_1)?;
        self.reg_write(REG_MODEM_CONFIG_1, (cfg1 & 0x0F) | (index << 4))
    }

    fn apply_coding_rate(&mut self, denominator: u8) -> Result<(), LinkError> {
        let cfg1 = self.reg_read(REG_MODEM_CONFIG_1)?;
        self.reg_write(REG_MODEM_CONFIG_1, (cfg1 & 0xF1) | ((denominator - 4) << 1))
    }

    fn apply_crc(&mut self, on: bool) -> Result<(), LinkError> {
        let cfg2 = self.reg_read(REG_MODEM_CONFIG_2)?;
        let value = if on { cfg2 | 0x04 } else { cfg2 & !0x04 };
        self.reg_write(REG_MODEM_CONFIG_2, value)
    }

    fn apply_header_mode(&mut self, implicit: bool) -> Result<(), LinkError> {
        let cfg1 = self.reg_read(REG_MODEM_CONFIG_1)?;
        let value = if implicit { cfg1 | 0x01 } else { cfg1 & !0x01 };
        self.reg_write(REG_MODEM_CONFIG_1, value)
    }

    fn apply_preamble(&mut self, symbols: u16) -> Result<(), LinkError> {
        self.reg_write(REG_PREAMBLE_MSB, (symbols >> 8) as u8)?;
        self.reg_write(REG_PREAMBLE_LSB, symbols as u8)
    }

    /// PA_BOOST output. Up to +17 dBm with the default PA DAC; +18..+20
    /// switches the DAC to high power and raises the over-current trim.
    fn apply_tx_power(&mut self, dbm: u8) -> Result<(), LinkError> {
        if dbm <= 17 {
            self.reg_write(REG_PA_DAC, PA_DAC_DEFAULT)?;
            self.reg_write(REG_OCP, OCP_100_MA)?;
            self.reg_write(REG_PA_CONFIG, PA_BOOST | (dbm - 2))
        } else {
            self.reg_write(REG_PA_DAC, PA_DAC_HIGH_POWER)?;
            self.reg_write(REG_OCP, OCP_240_MA)?;
            self.reg_write(REG_PA_CONFIG, PA_BOOST | (dbm - 5))
        }
    }

    fn write_frf(&mut self, hz: u32) -> Result<(), LinkError> {
        let frf = frf_from_hz(hz);
        self.reg_write(REG_FRF_MSB, (frf >> 16) as u8)?;
        self.reg_write(REG_FRF_MID, (frf >> 8) as u8)?;
        self.reg_write(REG_FRF_LSB, frf as u8)
    }

    // ---------------------------------------------------------------------
    // Low-level helpers
    // ---------------------------------------------------------------------

    fn set_mode(&mut self, mode: RadioMode) -> Result<(), LinkError> {
        let bits = match mode {
            RadioMode::Sleep => MODE_SLEEP,
            RadioMode::Standby => MODE_STANDBY,
            RadioMode::Tx => MODE_TX,
            RadioMode::RxContinuous => MODE_RX_CONTINUOUS,
            RadioMode::RxSingle => MODE_RX_SINGLE,
        };
        self.reg_write(REG_OP_MODE, MODE_LONG_RANGE | bits)?;
        self.mode = mode;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), LinkError> {
        if self.connected && self.hal.is_some() {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    fn reg_read(&mut self, addr: u8) -> Result<u8, LinkError> {
        let hal = self.hal.as_mut().ok_or(LinkError::NotConnected)?;
        match hal.read_register(addr) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.connected = false;
                Err(LinkError::io("register read", e))
            }
        }
    }

    fn reg_write(&mut self, addr: u8, value: u8) -> Result<(), LinkError> {
        let hal = self.hal.as_mut().ok_or(LinkError::NotConnected)?;
        match hal.write_register(addr, value) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.connected = false;
                Err(LinkError::io("register write", e))
            }
        }
    }

    fn reset_line(&mut self, high: bool) -> Result<(), LinkError> {
        let hal = self.hal.as_mut().ok_or(LinkError::NotConnected)?;
        hal.set_reset(high)
            .map_err(|e| LinkError::io("reset line", e))
    }

    fn emit(&mut self, event: RadioEvent) {
        self.subscribers.retain(|id, events| {
            if events.send(event.clone()).is_ok() {
                true
            } else {
                debug!("dropping dead subscriber {id}");
                false
            }
        });
    }
}
