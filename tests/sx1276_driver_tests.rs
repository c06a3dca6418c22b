//! # SX1276 Driver Tests
//!
//! Exercises the driver actor against a recording register-map mock:
//! bring-up, bit-exact parameter programming, transmit/receive sequencing,
//! IRQ dispatch and failure handling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use loralink_rs::radio::sx1276::registers::*;
use loralink_rs::radio::sx1276::{Dio0Edges, HalError, Sx1276Hal, Sx1276Handle};
use loralink_rs::radio::{RadioConfig, RadioEvent, TxOutcome};
use loralink_rs::LinkError;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, PartialEq)]
enum HalOp {
    Read(u8),
    Write(u8, u8),
    Reset(bool),
}

#[derive(Default)]
struct MockState {
    regs: HashMap<u8, u8>,
    ops: Vec<HalOp>,
    /// Raise TxDone as soon as the op-mode register selects TX.
    auto_tx_done: bool,
    /// Bytes returned by successive FIFO reads.
    fifo_rx: Vec<u8>,
    fifo_pos: usize,
    fail: bool,
}

/// Register-level chip stand-in shared between the test and the driver.
#[derive(Clone, Default)]
struct MockHal(Arc<Mutex<MockState>>);

impl MockHal {
    fn new() -> Self {
        let hal = Self::default();
        hal.set_reg(REG_VERSION, CHIP_VERSION);
        hal
    }

    fn set_reg(&self, addr: u8, value: u8) {
        self.0.lock().unwrap().regs.insert(addr, value);
    }

    fn reg(&self, addr: u8) -> u8 {
        *self.0.lock().unwrap().regs.get(&addr).unwrap_or(&0)
    }

    fn set_auto_tx_done(&self, on: bool) {
        self.0.lock().unwrap().auto_tx_done = on;
    }

    fn load_fifo(&self, bytes: &[u8]) {
        let mut state = self.0.lock().unwrap();
        state.fifo_rx = bytes.to_vec();
        state.fifo_pos = 0;
    }

    fn fail_io(&self, on: bool) {
        self.0.lock().unwrap().fail = on;
    }

    fn ops(&self) -> Vec<HalOp> {
        self.0.lock().unwrap().ops.clone()
    }

    fn clear_ops(&self) {
        self.0.lock().unwrap().ops.clear();
    }

    fn refs(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl Sx1276Hal for MockHal {
    fn read_register(&mut self, addr: u8) -> Result<u8, HalError> {
        let mut state = self.0.lock().unwrap();
        if state.fail {
            return Err(HalError::Spi("mock failure".into()));
        }
        state.ops.push(HalOp::Read(addr));
        if addr == REG_FIFO && state.fifo_pos < state.fifo_rx.len() {
            let byte = state.fifo_rx[state.fifo_pos];
            state.fifo_pos += 1;
            return Ok(byte);
        }
        Ok(*state.regs.get(&addr).unwrap_or(&0))
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), HalError> {
        let mut state = self.0.lock().unwrap();
        if state.fail {
            return Err(HalError::Spi("mock failure".into()));
        }
        state.ops.push(HalOp::Write(addr, value));
        match addr {
            // The IRQ register is write-1-to-clear.
            REG_IRQ_FLAGS => {
                let current = *state.regs.get(&REG_IRQ_FLAGS).unwrap_or(&0);
                state.regs.insert(REG_IRQ_FLAGS, current & !value);
            }
            REG_OP_MODE => {
                state.regs.insert(REG_OP_MODE, value);
                if state.auto_tx_done && value == (MODE_LONG_RANGE | MODE_TX) {
                    let irq = *state.regs.get(&REG_IRQ_FLAGS).unwrap_or(&0);
                    state
                        .regs
                        .insert(REG_IRQ_FLAGS, irq | IrqFlags::TX_DONE.bits());
                }
            }
            _ => {
                state.regs.insert(addr, value);
            }
        }
        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<(), HalError> {
        let mut state = self.0.lock().unwrap();
        if state.fail {
            return Err(HalError::Gpio("mock failure".into()));
        }
        state.ops.push(HalOp::Reset(high));
        Ok(())
    }
}

fn edge_channel() -> (mpsc::UnboundedSender<()>, Dio0Edges) {
    mpsc::unbounded_channel()
}

async fn started_driver(hal: &MockHal) -> (Sx1276Handle, mpsc::UnboundedSender<()>) {
    let (edge_tx, edge_rx) = edge_channel();
    let handle = Sx1276Handle::start(hal.clone(), edge_rx, RadioConfig::default())
        .await
        .expect("driver start");
    (handle, edge_tx)
}

#[tokio::test]
async fn test_begin_applies_defaults_and_ends_in_standby() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    assert!(handle.connected().await);
    assert_eq!(handle.get_version().await.unwrap(), 0x12);

    // Reset pulse before the version read.
    let ops = hal.ops();
    let reset_low = ops.iter().position(|op| *op == HalOp::Reset(false)).unwrap();
    let reset_high = ops.iter().position(|op| *op == HalOp::Reset(true)).unwrap();
    let version_read = ops
        .iter()
        .position(|op| *op == HalOp::Read(REG_VERSION))
        .unwrap();
    assert!(reset_low < reset_high && reset_high < version_read);

    // Left in LoRa standby.
    assert_eq!(hal.reg(REG_OP_MODE), MODE_LONG_RANGE | MODE_STANDBY);

    // Explicit header, CRC on, default sync word, zeroed FIFO bases.
    assert_eq!(hal.reg(REG_MODEM_CONFIG_1) & 0x01, 0x00);
    assert_eq!(hal.reg(REG_MODEM_CONFIG_2) & 0x04, 0x04);
    assert_eq!(hal.reg(REG_SYNC_WORD), 0x34);
    assert_eq!(hal.reg(REG_FIFO_TX_BASE_ADDR), 0x00);
    assert_eq!(hal.reg(REG_FIFO_RX_BASE_ADDR), 0x00);

    // SF7 in the high nibble, 125 kHz bandwidth bits, CR 4/5.
    assert_eq!(hal.reg(REG_MODEM_CONFIG_2) >> 4, 7);
    assert_eq!(hal.reg(REG_MODEM_CONFIG_1) >> 4, 7);
    assert_eq!(hal.reg(REG_MODEM_CONFIG_1) & 0x0E, (5 - 4) << 1);

    // LNA boost and auto AGC.
    assert_eq!(hal.reg(REG_LNA) & LNA_BOOST, LNA_BOOST);
    assert_eq!(hal.reg(REG_MODEM_CONFIG_3), AGC_AUTO_ON);

    // 915 MHz carrier.
    let frf = ((hal.reg(REG_FRF_MSB) as u32) << 16)
        | ((hal.reg(REG_FRF_MID) as u32) << 8)
        | hal.reg(REG_FRF_LSB) as u32;
    assert_eq!(frf, 14_991_360);
    assert_eq!(hz_from_frf(frf), 915_000_000);
}

#[tokio::test]
async fn test_begin_rejects_wrong_chip_version() {
    let hal = MockHal::new();
    hal.set_reg(REG_VERSION, 0x11);

    let (_edge_tx, edge_rx) = edge_channel();
    let err = Sx1276Handle::start(hal.clone(), edge_rx, RadioConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::InvalidChip(0x11)));

    // The driver dropped its HAL (and with it every opened handle); only
    // the test's clone remains.
    assert_eq!(hal.refs(), 1);
}

#[tokio::test]
async fn test_receive_mode_arms_continuous_rx() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;
    hal.clear_ops();

    handle.receive_mode(0).await.unwrap();

    assert_eq!(hal.reg(REG_OP_MODE), MODE_LONG_RANGE | MODE_RX_CONTINUOUS);
    assert_eq!(hal.reg(REG_DIO_MAPPING_1), DIO0_RX_TX_DONE);
    let ops = hal.ops();
    // Standby precedes the RX arm.
    let standby = ops
        .iter()
        .position(|op| *op == HalOp::Write(REG_OP_MODE, MODE_LONG_RANGE | MODE_STANDBY))
        .unwrap();
    let rx = ops
        .iter()
        .position(|op| *op == HalOp::Write(REG_OP_MODE, MODE_LONG_RANGE | MODE_RX_CONTINUOUS))
        .unwrap();
    assert!(standby < rx);
}

#[tokio::test]
async fn test_rx_frame_reaches_subscriber() {
    let hal = MockHal::new();
    let (handle, edge_tx) = started_driver(&hal).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);
    handle.receive_mode(0).await.unwrap();

    hal.set_reg(REG_IRQ_FLAGS, IrqFlags::RX_DONE.bits());
    hal.set_reg(REG_FIFO_RX_CURRENT_ADDR, 0x00);
    hal.set_reg(REG_RX_NB_BYTES, 2);
    hal.set_reg(REG_PKT_RSSI_VALUE, 157);
    hal.set_reg(REG_PKT_SNR_VALUE, 20);
    hal.load_fifo(&[0x48, 0x49]);
    edge_tx.send(()).unwrap();

    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .expect("event in time")
        .expect("channel open");
    match event {
        RadioEvent::Frame(frame) => {
            assert_eq!(frame.bytes, vec![0x48, 0x49]);
            assert_eq!(frame.rssi_dbm, Some(0));
            assert_eq!(frame.snr_db, Some(5.0));
        }
        other => panic!("expected frame, got {other:?}"),
    }

    // RxDone was cleared.
    assert_eq!(hal.reg(REG_IRQ_FLAGS) & IrqFlags::RX_DONE.bits(), 0);
}

#[tokio::test]
async fn test_negative_snr_decodes_as_quarter_db() {
    let hal = MockHal::new();
    let (handle, edge_tx) = started_driver(&hal).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);
    handle.receive_mode(0).await.unwrap();

    hal.set_reg(REG_IRQ_FLAGS, IrqFlags::RX_DONE.bits());
    hal.set_reg(REG_RX_NB_BYTES, 1);
    hal.set_reg(REG_PKT_RSSI_VALUE, 120);
    // -20 as two's complement: 236 -> -5.0 dB.
    hal.set_reg(REG_PKT_SNR_VALUE, 236);
    hal.load_fifo(&[0x00]);
    edge_tx.send(()).unwrap();

    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        RadioEvent::Frame(frame) => {
            assert_eq!(frame.rssi_dbm, Some(120 - 157));
            assert_eq!(frame.snr_db, Some(-5.0));
        }
        other => panic!("expected frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_crc_error_is_a_silent_drop() {
    let hal = MockHal::new();
    let (handle, edge_tx) = started_driver(&hal).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);
    handle.receive_mode(0).await.unwrap();

    hal.set_reg(
        REG_IRQ_FLAGS,
        (IrqFlags::RX_DONE | IrqFlags::PAYLOAD_CRC_ERROR).bits(),
    );
    edge_tx.send(()).unwrap();

    sleep(Duration::from_millis(100)).await;
    assert!(events_rx.try_recv().is_err(), "no event for a bad frame");
    // Both flags cleared.
    assert_eq!(hal.reg(REG_IRQ_FLAGS), 0x00);
}

#[tokio::test]
async fn test_spurious_edge_clears_flags_without_events() {
    let hal = MockHal::new();
    let (handle, edge_tx) = started_driver(&hal).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);

    // A stale TxDone while the driver sits in standby.
    hal.set_reg(REG_IRQ_FLAGS, IrqFlags::TX_DONE.bits());
    edge_tx.send(()).unwrap();

    sleep(Duration::from_millis(100)).await;
    assert!(events_rx.try_recv().is_err());
    assert_eq!(hal.reg(REG_IRQ_FLAGS), 0x00);
}

#[tokio::test]
async fn test_transmit_streams_fifo_and_reports_done() {
    let hal = MockHal::new();
    hal.set_auto_tx_done(true);
    let (handle, _edges) = started_driver(&hal).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);
    hal.clear_ops();

    let outcome = handle.transmit(b"HI".to_vec()).await.unwrap();
    assert_eq!(outcome, TxOutcome::Ok);

    let ops = hal.ops();
    let expected = [
        HalOp::Write(REG_OP_MODE, MODE_LONG_RANGE | MODE_STANDBY),
        HalOp::Write(REG_FIFO_ADDR_PTR, 0x00),
        HalOp::Write(REG_FIFO, b'H'),
        HalOp::Write(REG_FIFO, b'I'),
        HalOp::Write(REG_PAYLOAD_LENGTH, 2),
        HalOp::Write(REG_IRQ_FLAGS, 0xFF),
        HalOp::Write(REG_OP_MODE, MODE_LONG_RANGE | MODE_TX),
    ];
    assert_eq!(&ops[..expected.len()], &expected[..]);

    // Left in standby with TxDone cleared, and the completion fanned out.
    assert_eq!(hal.reg(REG_OP_MODE), MODE_LONG_RANGE | MODE_STANDBY);
    assert_eq!(hal.reg(REG_IRQ_FLAGS) & IrqFlags::TX_DONE.bits(), 0);
    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, RadioEvent::TxDone);
}

#[tokio::test]
async fn test_transmit_payload_bounds() {
    let hal = MockHal::new();
    hal.set_auto_tx_done(true);
    let (handle, _edges) = started_driver(&hal).await;

    assert!(matches!(
        handle.transmit(Vec::new()).await,
        Err(LinkError::InvalidParam(_))
    ));
    assert!(matches!(
        handle.transmit(vec![0u8; 256]).await,
        Err(LinkError::InvalidParam(_))
    ));

    assert_eq!(handle.transmit(vec![0xAA]).await.unwrap(), TxOutcome::Ok);
    assert_eq!(
        handle.transmit(vec![0x55; 255]).await.unwrap(),
        TxOutcome::Ok
    );
}

#[tokio::test(start_paused = true)]
async fn test_transmit_times_out_after_five_seconds() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);

    // No TxDone ever raised.
    let outcome = handle.transmit(b"X".to_vec()).await.unwrap();
    assert_eq!(outcome, TxOutcome::Timeout);
    assert_eq!(hal.reg(REG_OP_MODE), MODE_LONG_RANGE | MODE_STANDBY);

    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, RadioEvent::TxError);
}

#[tokio::test]
async fn test_dio0_edge_completes_transmit_between_polls() {
    let hal = MockHal::new();
    let (handle, edge_tx) = started_driver(&hal).await;

    let hal2 = hal.clone();
    let tx_task = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.transmit(b"ping".to_vec()).await })
    };

    // Let the transmit setup run, then raise TxDone and signal the edge.
    sleep(Duration::from_millis(2)).await;
    hal2.set_reg(REG_IRQ_FLAGS, IrqFlags::TX_DONE.bits());
    edge_tx.send(()).unwrap();

    let outcome = timeout(Duration::from_secs(2), tx_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TxOutcome::Ok);
}

#[tokio::test]
async fn test_spreading_factor_bits_and_detection_constants() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    handle.set_spreading_factor(9).await.unwrap();
    assert_eq!(hal.reg(REG_MODEM_CONFIG_2) >> 4, 9);
    assert_eq!(hal.reg(REG_DETECTION_OPTIMIZE), DETECTION_OPTIMIZE_SF7_12);
    assert_eq!(hal.reg(REG_DETECTION_THRESHOLD), DETECTION_THRESHOLD_SF7_12);
    // CRC bit untouched by the SF change.
    assert_eq!(hal.reg(REG_MODEM_CONFIG_2) & 0x04, 0x04);

    assert!(matches!(
        handle.set_spreading_factor(13).await,
        Err(LinkError::InvalidParam(_))
    ));
}

#[tokio::test]
async fn test_sf6_forces_implicit_header_and_special_tuning() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    handle.set_spreading_factor(6).await.unwrap();
    assert_eq!(hal.reg(REG_MODEM_CONFIG_2) >> 4, 6);
    assert_eq!(hal.reg(REG_DETECTION_OPTIMIZE), DETECTION_OPTIMIZE_SF6);
    assert_eq!(hal.reg(REG_DETECTION_THRESHOLD), DETECTION_THRESHOLD_SF6);
    assert_eq!(hal.reg(REG_MODEM_CONFIG_1) & 0x01, 0x01);
    assert!(handle.settings().await.unwrap().implicit_header);
}

#[tokio::test]
async fn test_bandwidth_bits_cover_the_table() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    for (index, bw) in [
        7_800u32, 10_400, 15_600, 20_800, 31_250, 41_700, 62_500, 125_000, 250_000, 500_000,
    ]
    .into_iter()
    .enumerate()
    {
        handle.set_bandwidth(bw).await.unwrap();
        assert_eq!(hal.reg(REG_MODEM_CONFIG_1) >> 4, index as u8, "bw {bw}");
    }

    assert!(matches!(
        handle.set_bandwidth(200_000).await,
        Err(LinkError::InvalidParam(_))
    ));
}

#[tokio::test]
async fn test_coding_rate_bits() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    for denominator in 5u8..=8 {
        handle.set_coding_rate(denominator).await.unwrap();
        assert_eq!(
            hal.reg(REG_MODEM_CONFIG_1) & 0x0E,
            (denominator - 4) << 1,
            "cr 4/{denominator}"
        );
    }
    // Bandwidth nibble survives coding-rate writes.
    assert_eq!(hal.reg(REG_MODEM_CONFIG_1) >> 4, 7);

    assert!(matches!(
        handle.set_coding_rate(9).await,
        Err(LinkError::InvalidParam(_))
    ));
}

#[tokio::test]
async fn test_tx_power_pa_dac_boundary() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    handle.set_tx_power(17).await.unwrap();
    assert_eq!(hal.reg(REG_PA_DAC), PA_DAC_DEFAULT);
    assert_eq!(hal.reg(REG_OCP), OCP_100_MA);
    assert_eq!(hal.reg(REG_PA_CONFIG), PA_BOOST | (17 - 2));

    handle.set_tx_power(18).await.unwrap();
    assert_eq!(hal.reg(REG_PA_DAC), PA_DAC_HIGH_POWER);
    assert_eq!(hal.reg(REG_OCP), OCP_240_MA);
    assert_eq!(hal.reg(REG_PA_CONFIG), PA_BOOST | (18 - 5));

    handle.set_tx_power(2).await.unwrap();
    assert_eq!(hal.reg(REG_PA_CONFIG), PA_BOOST);

    for bad in [1u8, 21] {
        assert!(matches!(
            handle.set_tx_power(bad).await,
            Err(LinkError::InvalidParam(_))
        ));
    }
}

#[tokio::test]
async fn test_setters_pass_through_standby() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;
    hal.clear_ops();

    handle.set_bandwidth(250_000).await.unwrap();

    let ops = hal.ops();
    assert_eq!(
        ops.first(),
        Some(&HalOp::Write(REG_OP_MODE, MODE_LONG_RANGE | MODE_STANDBY))
    );
    // No other mode write: the chip is left in standby.
    let mode_writes: Vec<_> = ops
        .iter()
        .filter(|op| matches!(op, HalOp::Write(addr, _) if *addr == REG_OP_MODE))
        .collect();
    assert_eq!(mode_writes.len(), 1);
}

#[tokio::test]
async fn test_sync_word_and_frequency_setters() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    handle.set_sync_word(0x12).await.unwrap();
    assert_eq!(hal.reg(REG_SYNC_WORD), 0x12);
    assert_eq!(handle.settings().await.unwrap().sync_word, 0x12);

    handle.set_frequency(868_100_000).await.unwrap();
    let frf = ((hal.reg(REG_FRF_MSB) as u32) << 16)
        | ((hal.reg(REG_FRF_MID) as u32) << 8)
        | hal.reg(REG_FRF_LSB) as u32;
    let step = F_XOSC / (1 << 19) + 1;
    assert!(hz_from_frf(frf).abs_diff(868_100_000) <= step);

    assert!(matches!(
        handle.set_frequency(50_000_000).await,
        Err(LinkError::InvalidParam(_))
    ));
}

#[tokio::test]
async fn test_get_rssi_applies_hf_offset() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    hal.set_reg(REG_RSSI_VALUE, 100);
    assert_eq!(handle.get_rssi().await.unwrap(), 100 - 157);
}

#[tokio::test]
async fn test_disconnect_releases_hal_and_blocks_operations() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    handle.disconnect().await.unwrap();
    assert!(!handle.connected().await);
    // Only the test still references the mock state.
    assert_eq!(hal.refs(), 1);

    assert!(matches!(
        handle.transmit(b"X".to_vec()).await,
        Err(LinkError::NotConnected)
    ));
    assert!(matches!(
        handle.receive_mode(0).await,
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test]
async fn test_io_error_marks_driver_disconnected() {
    let hal = MockHal::new();
    let (handle, _edges) = started_driver(&hal).await;

    hal.fail_io(true);
    assert!(matches!(
        handle.receive_mode(0).await,
        Err(LinkError::Io { .. })
    ));

    hal.fail_io(false);
    assert!(!handle.connected().await);
    assert!(matches!(
        handle.transmit(b"X".to_vec()).await,
        Err(LinkError::NotConnected)
    ));

    // A hardware reset re-runs the bring-up and recovers the driver.
    handle.hardware_reset().await.unwrap();
    assert!(handle.connected().await);
}
