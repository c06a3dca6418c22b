//! # RN2903 Modem Actor
//!
//! Request/response driver for the RN2903 over its line transport. One
//! actor owns the write half of the port and all protocol state; a reader
//! task feeds received lines into the same inbox as commands, so replies
//! and asynchronous notifications are serialized with command handling.
//!
//! Protocol rules implemented here:
//!
//! - at most one command in flight; the reply is the next complete line,
//! - asynchronous `radio_rx` / `radio_tx_ok` / `radio_err` lines reach the
//!   pending command's waiter (as the next line) and are always parsed for
//!   subscriber fan-out,
//! - wake-up on connect: flush, three bare CRLFs, `sys get ver`, retried
//!   until a line starting with `RN` arrives; `invalid_param` on the first
//!   attempt is normal and transient,
//! - the modem reports no RSSI/SNR for received frames, so frames carry
//!   `None` there.

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

use crate::actor::{mailbox, Inbox, Mailbox, WeakMailbox};
use crate::error::LinkError;
use crate::radio::rn2903::proto::{parse_line, ModemLine};
use crate::radio::rn2903::transport::{self, ReaderEvent};
use crate::radio::{EventSender, RadioConfig, RadioEvent, RxFrame, SubscriberId, TxOutcome};
use crate::util::hex::encode_hex;

/// Deadline for ordinary request/reply calls into the actor.
const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for transmit calls (submission plus on-air completion).
const TX_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the modem's reply line to a command.
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

/// How long to wait for `radio_tx_ok` after a transmission was accepted.
const TX_DONE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wake-up handshake bounds.
const WAKEUP_ATTEMPTS: u32 = 3;
const WAKEUP_RETRY_DELAY: Duration = Duration::from_millis(150);
const WAKEUP_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

type Reply<T> = oneshot::Sender<Result<T, LinkError>>;

enum Msg {
    Command(Command),
    Line(String),
    PortClosed,
    Expired { seq: u64 },
}

enum Command {
    Raw {
        command: String,
        wait: Duration,
        reply: Reply<String>,
    },
    Transmit {
        payload: Vec<u8>,
        reply: Reply<TxOutcome>,
    },
    ReceiveMode {
        timeout_ms: u32,
        reply: Reply<()>,
    },
    SetFrequency {
        hz: u32,
        reply: Reply<()>,
    },
    SetSpreadingFactor {
        sf: u8,
        reply: Reply<()>,
    },
    SetBandwidth {
        hz: u32,
        reply: Reply<()>,
    },
    SetTxPower {
        dbm: u8,
        reply: Reply<()>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    GetVersion {
        reply: Reply<String>,
    },
    Settings {
        reply: Reply<RadioConfig>,
    },
    Connected {
        reply: oneshot::Sender<bool>,
    },
    Subscribe {
        id: SubscriberId,
        events: EventSender,
    },
    Unsubscribe {
        id: SubscriberId,
    },
}

/// What the actor is currently waiting on from the modem.
enum Pending {
    /// A raw command; resolved by the next line, whatever it is.
    Raw { reply: Reply<String>, seq: u64 },
    /// A typed command expecting `ok`; `update` is applied on success.
    Ok {
        op: &'static str,
        update: Option<ConfigUpdate>,
        reply: Reply<()>,
        seq: u64,
    },
    /// `radio tx` sent, waiting for the acceptance line.
    TxSubmit { reply: Reply<TxOutcome>, seq: u64 },
    /// Transmission accepted, waiting for `radio_tx_ok` / `radio_err`.
    TxDoneWait { reply: Reply<TxOutcome>, seq: u64 },
}

/// Settings snapshot update applied when the modem acknowledges a setter.
enum ConfigUpdate {
    Frequency(u32),
    SpreadingFactor(u8),
    Bandwidth(u32),
    TxPower(u8),
}

/// Cloneable handle to a running RN2903 modem actor.
#[derive(Clone)]
pub struct Rn2903Handle {
    mailbox: Mailbox<Msg>,
}

impl Rn2903Handle {
    /// Wake the modem behind `stream`, record its version banner, pause
    /// the LoRaWAN MAC and apply the radio settings from `config`.
    ///
    /// Generic over the stream so tests connect through an in-memory pipe;
    /// production opens the port with [`transport::open`].
    pub async fn connect<S>(stream: S, config: RadioConfig) -> Result<Self, LinkError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        config.validate()?;

        let (rd, mut wr) = tokio::io::split(stream);
        let mut reader = transport::spawn_reader(rd);

        let version = wake_up(&mut wr, &mut reader).await?;
        info!("RN2903 awake: {version}");

        // A retried wake-up can leave late duplicate banners queued; they
        // must not be mistaken for the reply to the next command.
        while let Ok(stale) = reader.try_recv() {
            debug!("discarding stale wake-up line: {stale:?}");
        }

        let (mb, inbox) = mailbox();

        // Bridge the reader into the actor inbox.
        let bridge = mb.downgrade();
        tokio::spawn(async move {
            while let Some(event) = reader.recv().await {
                let msg = match event {
                    ReaderEvent::Line(line) => Msg::Line(line),
                    ReaderEvent::Closed => Msg::PortClosed,
                };
                if !bridge.cast(msg) {
                    break;
                }
            }
        });

        let modem = Modem {
            wr,
            mailbox: mb.downgrade(),
            config: config.clone(),
            version,
            connected: true,
            pending: None,
            seq: 0,
            subscribers: HashMap::new(),
        };
        tokio::spawn(modem.run(inbox));

        let handle = Self { mailbox: mb };

        // Point-to-point operation: suspend the LoRaWAN MAC, then program
        // the radio. `mac pause` answers with the pause budget in ms.
        handle.raw_command("mac pause", REPLY_TIMEOUT).await?;
        handle.set_frequency(config.frequency_hz).await?;
        handle.set_spreading_factor(config.spreading_factor).await?;
        handle.set_bandwidth(config.bandwidth_hz).await?;
        handle.set_tx_power(config.tx_power_dbm).await?;

        Ok(handle)
    }

    /// Send a raw command line and return the next reply line.
    pub async fn raw_command(&self, command: &str, wait: Duration) -> Result<String, LinkError> {
        let command = command.to_string();
        self.mailbox
            .call(
                |reply| {
                    Msg::Command(Command::Raw {
                        command,
                        wait,
                        reply,
                    })
                },
                wait + CALL_TIMEOUT,
            )
            .await?
    }

    /// Transmit a payload of 1..=255 bytes, waiting for `radio_tx_ok`.
    pub async fn transmit(&self, payload: Vec<u8>) -> Result<TxOutcome, LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::Transmit { payload, reply }),
                TX_CALL_TIMEOUT,
            )
            .await?
    }

    /// Arm reception; `0` receives until the next packet arrives.
    pub async fn receive_mode(&self, timeout_ms: u32) -> Result<(), LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::ReceiveMode { timeout_ms, reply }),
                CALL_TIMEOUT + REPLY_TIMEOUT,
            )
            .await?
    }

    pub async fn set_frequency(&self, hz: u32) -> Result<(), LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::SetFrequency { hz, reply }),
                CALL_TIMEOUT + REPLY_TIMEOUT,
            )
            .await?
    }

    pub async fn set_spreading_factor(&self, sf: u8) -> Result<(), LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::SetSpreadingFactor { sf, reply }),
                CALL_TIMEOUT + REPLY_TIMEOUT,
            )
            .await?
    }

    pub async fn set_bandwidth(&self, hz: u32) -> Result<(), LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::SetBandwidth { hz, reply }),
                CALL_TIMEOUT + REPLY_TIMEOUT,
            )
            .await?
    }

    pub async fn set_tx_power(&self, dbm: u8) -> Result<(), LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::SetTxPower { dbm, reply }),
                CALL_TIMEOUT + REPLY_TIMEOUT,
            )
            .await?
    }

    /// Stop the actor and close the port.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::Disconnect { reply }),
                CALL_TIMEOUT,
            )
            .await?
    }

    /// Version banner recorded during wake-up.
    pub async fn get_version(&self) -> Result<String, LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::GetVersion { reply }),
                CALL_TIMEOUT,
            )
            .await?
    }

    /// Snapshot of the radio parameters the modem has acknowledged.
    pub async fn settings(&self) -> Result<RadioConfig, LinkError> {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::Settings { reply }),
                CALL_TIMEOUT,
            )
            .await?
    }

    pub async fn connected(&self) -> bool {
        self.mailbox
            .call(
                |reply| Msg::Command(Command::Connected { reply }),
                CALL_TIMEOUT,
            )
            .await
            .unwrap_or(false)
    }

    /// Register an event subscriber. Never fails.
    pub fn subscribe(&self, id: SubscriberId, events: EventSender) {
        self.mailbox.cast(Msg::Command(Command::Subscribe { id, events }));
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.mailbox.cast(Msg::Command(Command::Unsubscribe { id }));
    }
}

/// Wake-up handshake. The modem often answers the first probe with
/// `invalid_param` while its UART resynchronizes; that is expected.
async fn wake_up<W>(
    wr: &mut W,
    reader: &mut mpsc::UnboundedReceiver<ReaderEvent>,
) -> Result<String, LinkError>
where
    W: AsyncWrite + Unpin,
{
    for attempt in 1..=WAKEUP_ATTEMPTS {
        transport::write_wakeup(wr).await?;
        transport::write_line(wr, "sys get ver").await?;

        let deadline = tokio::time::Instant::now() + WAKEUP_REPLY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, reader.recv()).await {
                Ok(Some(ReaderEvent::Line(line))) => match parse_line(&line) {
                    ModemLine::Version(version) => return Ok(version),
                    ModemLine::InvalidParam => {
                        debug!("wake-up attempt {attempt}: invalid_param (transient)");
                    }
                    other => debug!("wake-up attempt {attempt}: ignoring {other:?}"),
                },
                Ok(Some(ReaderEvent::Closed)) | Ok(None) => {
                    return Err(LinkError::io("modem wake-up", "port closed"))
                }
                Err(_) => break,
            }
        }
        sleep(WAKEUP_RETRY_DELAY).await;
    }
    Err(LinkError::Timeout("RN2903 version banner"))
}

struct Modem<S> {
    wr: WriteHalf<S>,
    mailbox: WeakMailbox<Msg>,
    config: RadioConfig,
    version: String,
    connected: bool,
    pending: Option<Pending>,
    seq: u64,
    subscribers: HashMap<SubscriberId, EventSender>,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Modem<S> {
    async fn run(mut self, mut inbox: Inbox<Msg>) {
        while let Some(msg) = inbox.recv().await {
            match msg {
                Msg::Command(cmd) => {
                    if self.handle_command(cmd).await {
                        break;
                    }
                }
                Msg::Line(line) => self.handle_line(line),
                Msg::PortClosed => {
                    warn!("RN2903 port closed");
                    self.connected = false;
                    self.fail_pending(LinkError::NotConnected);
                }
                Msg::Expired { seq } => self.handle_expiry(seq),
            }
        }
        debug!("RN2903 modem actor stopped");
    }

    /// Returns `true` when the actor should stop.
    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Raw {
                command,
                wait,
                reply,
            } => {
                if let Err(e) = self.begin_exchange(&command, wait).await {
                    let _ = reply.send(Err(e));
                    return false;
                }
                self.pending = Some(Pending::Raw {
                    reply,
                    seq: self.seq,
                });
            }
            Command::Transmit { payload, reply } => {
                if payload.is_empty() || payload.len() > 255 {
                    let _ = reply.send(Err(LinkError::InvalidParam(format!(
                        "payload length {} out of range 1..=255",
                        payload.len()
                    ))));
                    return false;
                }
                let command = format!("radio tx {}", encode_hex(&payload));
                if let Err(e) = self.begin_exchange(&command, REPLY_TIMEOUT).await {
                    let _ = reply.send(Err(e));
                    return false;
                }
                self.pending = Some(Pending::TxSubmit {
                    reply,
                    seq: self.seq,
                });
            }
            Command::ReceiveMode { timeout_ms, reply } => {
                let command = format!("radio rx {timeout_ms}");
                self.typed_exchange(command, "receive mode", None, reply)
                    .await;
            }
            Command::SetFrequency { hz, reply } => {
                if !(137_000_000..=1_020_000_000).contains(&hz) {
                    let _ = reply.send(Err(LinkError::InvalidParam(format!(
                        "frequency {hz} Hz out of range 137..=1020 MHz"
                    ))));
                    return false;
                }
                let command = format!("radio set freq {hz}");
                self.typed_exchange(
                    command,
                    "set frequency",
                    Some(ConfigUpdate::Frequency(hz)),
                    reply,
                )
                .await;
            }
            Command::SetSpreadingFactor { sf, reply } => {
                if !(7..=12).contains(&sf) {
                    let _ = reply.send(Err(LinkError::InvalidParam(format!(
                        "RN2903 spreading factor {sf} out of range 7..=12"
                    ))));
                    return false;
                }
                let command = format!("radio set sf sf{sf}");
                self.typed_exchange(
                    command,
                    "set spreading factor",
                    Some(ConfigUpdate::SpreadingFactor(sf)),
                    reply,
                )
                .await;
            }
            Command::SetBandwidth { hz, reply } => {
                let khz = match hz {
                    125_000 => 125,
                    250_000 => 250,
                    500_000 => 500,
                    other => {
                        let _ = reply.send(Err(LinkError::InvalidParam(format!(
                            "RN2903 bandwidth {other} Hz not one of 125/250/500 kHz"
                        ))));
                        return false;
                    }
                };
                let command = format!("radio set bw {khz}");
                self.typed_exchange(
                    command,
                    "set bandwidth",
                    Some(ConfigUpdate::Bandwidth(hz)),
                    reply,
                )
                .await;
            }
            Command::SetTxPower { dbm, reply } => {
                if !(2..=20).contains(&dbm) {
                    let _ = reply.send(Err(LinkError::InvalidParam(format!(
                        "TX power {dbm} dBm out of range 2..=20"
                    ))));
                    return false;
                }
                let command = format!("radio set pwr {dbm}");
                self.typed_exchange(command, "set power", Some(ConfigUpdate::TxPower(dbm)), reply)
                    .await;
            }
            Command::Disconnect { reply } => {
                self.connected = false;
                self.fail_pending(LinkError::NotConnected);
                let _ = reply.send(Ok(()));
                info!("RN2903 disconnected, port released");
                return true;
            }
            Command::GetVersion { reply } => {
                let result = if self.connected {
                    Ok(self.version.clone())
                } else {
                    Err(LinkError::NotConnected)
                };
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
        false
    }

    /// Send a typed command expecting `ok` and park it as pending.
    async fn typed_exchange(
        &mut self,
        command: String,
        op: &'static str,
        update: Option<ConfigUpdate>,
        reply: Reply<()>,
    ) {
        if let Err(e) = self.begin_exchange(&command, REPLY_TIMEOUT).await {
            let _ = reply.send(Err(e));
            return;
        }
        self.pending = Some(Pending::Ok {
            op,
            update,
            reply,
            seq: self.seq,
        });
    }

    /// Common checks and the actual write for any outgoing command. Bumps
    /// the sequence counter and schedules the expiry message.
    async fn begin_exchange(&mut self, command: &str, wait: Duration) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::NotConnected);
        }
        if self.pending.is_some() {
            return Err(LinkError::ResourceBusy("modem command in flight"));
        }
        if let Err(e) = transport::write_line(&mut self.wr, command).await {
            self.connected = false;
            return Err(e);
        }
        self.seq += 1;
        self.schedule_expiry(self.seq, wait);
        Ok(())
    }

    fn schedule_expiry(&self, seq: u64, wait: Duration) {
        let mb = self.mailbox.clone();
        tokio::spawn(async move {
            sleep(wait).await;
            mb.cast(Msg::Expired { seq });
        });
    }

    fn handle_line(&mut self, line: String) {
        let parsed = parse_line(&line);

        // Notifications always reach the fan-out, whether or not a command
        // is pending.
        match &parsed {
            ModemLine::RadioRx(bytes) => {
                // The modem reports no signal metadata with radio_rx.
                self.emit(RadioEvent::Frame(RxFrame {
                    bytes: bytes.clone(),
                    rssi_dbm: None,
                    snr_db: None,
                }));
            }
            ModemLine::RadioRxBadHex(raw) => {
                warn!("dropping malformed radio_rx line: {raw:?}");
            }
            ModemLine::RadioTxOk => self.emit(RadioEvent::TxDone),
            ModemLine::RadioErr => self.emit(RadioEvent::TxError),
            _ => {}
        }

        match self.pending.take() {
            None => {
                if matches!(parsed, ModemLine::Other(_)) {
                    debug!("unsolicited modem line: {line:?}");
                }
            }
            Some(Pending::Raw { reply, .. }) => {
                let _ = reply.send(Ok(line));
            }
            Some(Pending::Ok {
                op, update, reply, ..
            }) => {
                let result = match parsed {
                    ModemLine::Ack => {
                        if let Some(update) = update {
                            self.apply_update(update);
                        }
                        Ok(())
                    }
                    ModemLine::InvalidParam => {
                        Err(LinkError::InvalidParam(format!("{op}: invalid_param")))
                    }
                    ModemLine::Busy => Err(LinkError::ResourceBusy("modem radio busy")),
                    _ => Err(LinkError::io(op, format!("unexpected reply {line:?}"))),
                };
                let _ = reply.send(result);
            }
            Some(Pending::TxSubmit { reply, .. }) => match parsed {
                ModemLine::Ack => {
                    // Accepted; now wait for the completion notification
                    // under a fresh sequence so the submission timer
                    // cannot expire it.
                    self.seq += 1;
                    let seq = self.seq;
                    self.schedule_expiry(seq, TX_DONE_TIMEOUT);
                    self.pending = Some(Pending::TxDoneWait { reply, seq });
                }
                ModemLine::Busy => {
                    warn!("radio tx rejected: busy");
                    let _ = reply.send(Ok(TxOutcome::Err));
                }
                _ => {
                    warn!("radio tx rejected: {line:?}");
                    let _ = reply.send(Ok(TxOutcome::Err));
                }
            },
            Some(Pending::TxDoneWait { reply, seq }) => match parsed {
                ModemLine::RadioTxOk => {
                    let _ = reply.send(Ok(TxOutcome::Ok));
                }
                ModemLine::RadioErr => {
                    let _ = reply.send(Ok(TxOutcome::Err));
                }
                // Anything else (e.g. a cross-traffic radio_rx) has been
                // fanned out above; keep waiting for the completion line.
                _ => self.pending = Some(Pending::TxDoneWait { reply, seq }),
            },
        }
    }

    fn handle_expiry(&mut self, seq: u64) {
        let stale = !matches!(
            &self.pending,
            Some(Pending::Raw { seq: s, .. })
            | Some(Pending::Ok { seq: s, .. })
            | Some(Pending::TxSubmit { seq: s, .. })
            | Some(Pending::TxDoneWait { seq: s, .. }) if *s == seq
        );
        if stale {
            return;
        }
        match self.pending.take() {
            Some(Pending::Raw { reply, .. }) => {
                let _ = reply.send(Err(LinkError::Timeout("modem reply")));
            }
            Some(Pending::Ok { op, reply, .. }) => {
                warn!("{op}: no reply from modem");
                let _ = reply.send(Err(LinkError::Timeout("modem reply")));
            }
            Some(Pending::TxSubmit { reply, .. }) => {
                let _ = reply.send(Err(LinkError::Timeout("radio tx acceptance")));
            }
            Some(Pending::TxDoneWait { reply, .. }) => {
                warn!("no radio_tx_ok within {TX_DONE_TIMEOUT:?}");
                self.emit(RadioEvent::TxError);
                let _ = reply.send(Ok(TxOutcome::Timeout));
            }
            None => {}
        }
    }

    fn fail_pending(&mut self, err: LinkError) {
        match self.pending.take() {
            Some(Pending::Raw { reply, .. }) => {
                let _ = reply.send(Err(err));
            }
            Some(Pending::Ok { reply, .. }) => {
                let _ = reply.send(Err(err));
            }
            Some(Pending::TxSubmit { reply, .. }) | Some(Pending::TxDoneWait { reply, .. }) => {
                let _ = reply.send(Err(err));
            }
            None => {}
        }
    }

    fn apply_update(&mut self, update: ConfigUpdate) {
        match update {
            ConfigUpdate::Frequency(hz) => self.config.frequency_hz = hz,
            ConfigUpdate::SpreadingFactor(sf) => self.config.spreading_factor = sf,
            ConfigUpdate::Bandwidth(hz) => self.config.bandwidth_hz = hz,
            ConfigUpdate::TxPower(dbm) => self.config.tx_power_dbm = dbm,
        }
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
