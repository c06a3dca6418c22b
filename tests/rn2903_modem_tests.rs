//! # RN2903 Modem Tests
//!
//! Drives the modem actor over an in-memory duplex pipe with a scripted
//! peer on the far end: wake-up handshake, command round-trips,
//! notification fan-out and the transmit submission/completion sequence.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use loralink_rs::radio::rn2903::Rn2903Handle;
use loralink_rs::radio::{RadioConfig, RadioEvent, TxOutcome};
use loralink_rs::LinkError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

#[derive(Clone, Default)]
struct FakeModemOptions {
    /// Answer the first version query with `invalid_param`.
    flaky_wakeup: bool,
    /// Do not send `radio_tx_ok` after accepting `radio tx`.
    hold_tx_done: bool,
}

/// Scripted device on the far end of the pipe. Records every command line
/// it sees; unsolicited lines are injected through the returned sender.
struct FakeModem {
    commands: Arc<Mutex<Vec<String>>>,
    inject: mpsc::UnboundedSender<String>,
}

impl FakeModem {
    fn spawn(stream: DuplexStream, options: FakeModemOptions) -> Self {
        let commands: Arc<Mutex<Vec<String>>> = Arc::default();
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<String>();

        let seen = commands.clone();
        tokio::spawn(async move {
            let (rd, mut wr) = tokio::io::split(stream);

            // Pump incoming lines through a channel so the select below
            // never cancels a partial read.
            let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
            tokio::spawn(async move {
                let mut lines = BufReader::new(rd).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            });

            let mut version_queries = 0u32;
            loop {
                tokio::select! {
                    line = line_rx.recv() => {
                        let line = match line {
                            Some(line) => line.trim().to_string(),
                            None => break,
                        };
                        if line.is_empty() {
                            continue;
                        }
                        seen.lock().unwrap().push(line.clone());
                        let reply = if line == "sys get ver" {
                            version_queries += 1;
                            if options.flaky_wakeup && version_queries == 1 {
                                "invalid_param"
                            } else {
                                "RN2903 1.0.5 Nov 06 2018 10:45:27"
                            }
                        } else if line == "mac pause" {
                            "4294967245"
                        } else if line.starts_with("radio set ") || line.starts_with("radio rx ") {
                            "ok"
                        } else if line.starts_with("radio tx ") {
                            if wr.write_all(b"ok\r\n").await.is_err() {
                                break;
                            }
                            if !options.hold_tx_done
                                && wr.write_all(b"radio_tx_ok\r\n").await.is_err()
                            {
                                break;
                            }
                            continue;
                        } else {
                            "invalid_param"
                        };
                        if wr.write_all(format!("{reply}\r\n").as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    unsolicited = inject_rx.recv() => {
                        match unsolicited {
                            Some(line) => {
                                if wr.write_all(format!("{line}\r\n").as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Self {
            commands,
            inject: inject_tx,
        }
    }

    fn saw(&self, command: &str) -> bool {
        self.commands.lock().unwrap().iter().any(|c| c == command)
    }

    fn inject(&self, line: &str) {
        self.inject.send(line.to_string()).unwrap();
    }
}

async fn connected_modem(options: FakeModemOptions) -> (Rn2903Handle, FakeModem) {
    let (near, far) = tokio::io::duplex(4096);
    let fake = FakeModem::spawn(far, options);
    let handle = Rn2903Handle::connect(near, RadioConfig::default())
        .await
        .expect("modem connect");
    (handle, fake)
}

#[tokio::test]
async fn test_connect_wakes_modem_and_applies_settings() {
    let (handle, fake) = connected_modem(FakeModemOptions::default()).await;

    assert!(handle.connected().await);
    assert!(handle
        .get_version()
        .await
        .unwrap()
        .starts_with("RN2903 1.0.5"));

    // MAC suspended, then the radio programmed from the configuration.
    assert!(fake.saw("mac pause"));
    assert!(fake.saw("radio set freq 915000000"));
    assert!(fake.saw("radio set sf sf7"));
    assert!(fake.saw("radio set bw 125"));
    assert!(fake.saw("radio set pwr 14"));
}

#[tokio::test]
async fn test_wakeup_survives_transient_invalid_param() {
    let options = FakeModemOptions {
        flaky_wakeup: true,
        ..Default::default()
    };
    let (handle, _fake) = connected_modem(options).await;
    assert!(handle.connected().await);
}

#[tokio::test]
async fn test_transmit_sends_hex_and_waits_for_completion() {
    let (handle, fake) = connected_modem(FakeModemOptions::default()).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);

    let outcome = handle.transmit(b"HI!".to_vec()).await.unwrap();
    assert_eq!(outcome, TxOutcome::Ok);
    assert!(fake.saw("radio tx 484921"));

    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, RadioEvent::TxDone);
}

#[tokio::test]
async fn test_transmit_error_line_reports_err() {
    let options = FakeModemOptions {
        hold_tx_done: true,
        ..Default::default()
    };
    let (handle, fake) = connected_modem(options).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(1, events_tx);

    let task = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.transmit(b"HI".to_vec()).await })
    };
    sleep(Duration::from_millis(100)).await;
    fake.inject("radio_err");

    let outcome = timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TxOutcome::Err);

    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, RadioEvent::TxError);
}

#[tokio::test]
async fn test_one_command_in_flight() {
    let options = FakeModemOptions {
        hold_tx_done: true,
        ..Default::default()
    };
    let (handle, fake) = connected_modem(options).await;

    let task = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.transmit(b"HI".to_vec()).await })
    };
    sleep(Duration::from_millis(100)).await;

    // The transmission still waits for its completion line.
    let err = handle
        .raw_command("sys get ver", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::ResourceBusy(_)));

    fake.inject("radio_tx_ok");
    let outcome = timeout(Duration::from_secs(2), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(outcome, TxOutcome::Ok);
}

#[tokio::test]
async fn test_radio_rx_fans_out_without_signal_metadata() {
    let (handle, fake) = connected_modem(FakeModemOptions::default()).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(7, events_tx);

    handle.receive_mode(0).await.unwrap();
    assert!(fake.saw("radio rx 0"));

    // Mixed-case hex must decode.
    fake.inject("radio_rx 48aBcD");
    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        RadioEvent::Frame(frame) => {
            assert_eq!(frame.bytes, vec![0x48, 0xAB, 0xCD]);
            assert_eq!(frame.rssi_dbm, None);
            assert_eq!(frame.snr_db, None);
        }
        other => panic!("expected frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_rx_lines_are_dropped() {
    let (handle, fake) = connected_modem(FakeModemOptions::default()).await;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    handle.subscribe(7, events_tx);

    fake.inject("radio_rx 484");
    fake.inject("radio_rx zz");
    sleep(Duration::from_millis(100)).await;
    assert!(events_rx.try_recv().is_err());

    // A good line afterwards still gets through.
    fake.inject("radio_rx 4849");
    let event = timeout(Duration::from_secs(1), events_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, RadioEvent::Frame(f) if f.bytes == vec![0x48, 0x49]));
}

#[tokio::test]
async fn test_transmit_payload_bounds() {
    let (handle, _fake) = connected_modem(FakeModemOptions::default()).await;

    assert!(matches!(
        handle.transmit(Vec::new()).await,
        Err(LinkError::InvalidParam(_))
    ));
    assert!(matches!(
        handle.transmit(vec![0u8; 256]).await,
        Err(LinkError::InvalidParam(_))
    ));
    assert_eq!(
        handle.transmit(vec![0u8; 255]).await.unwrap(),
        TxOutcome::Ok
    );
}

#[tokio::test]
async fn test_settings_track_acknowledged_values() {
    let config = RadioConfig {
        spreading_factor: 9,
        bandwidth_hz: 250_000,
        tx_power_dbm: 18,
        ..Default::default()
    };
    let (near, far) = tokio::io::duplex(4096);
    let fake = FakeModem::spawn(far, FakeModemOptions::default());
    let handle = Rn2903Handle::connect(near, config).await.unwrap();

    assert!(fake.saw("radio set sf sf9"));
    assert!(fake.saw("radio set bw 250"));
    assert!(fake.saw("radio set pwr 18"));

    let settings = handle.settings().await.unwrap();
    assert_eq!(settings.spreading_factor, 9);
    assert_eq!(settings.bandwidth_hz, 250_000);
    assert_eq!(settings.tx_power_dbm, 18);
}

#[tokio::test]
async fn test_disconnect_blocks_further_commands() {
    let (handle, _fake) = connected_modem(FakeModemOptions::default()).await;

    handle.disconnect().await.unwrap();
    assert!(matches!(
        handle.transmit(b"X".to_vec()).await,
        Err(LinkError::NotConnected)
    ));
}

#[tokio::test]
async fn test_unsupported_bandwidth_is_rejected() {
    let (handle, _fake) = connected_modem(FakeModemOptions::default()).await;
    assert!(matches!(
        handle.set_bandwidth(62_500).await,
        Err(LinkError::InvalidParam(_))
    ));
}
