//! # Echo Responder
//!
//! Receive, wait, transmit back with a prefix, re-arm. The wait before
//! transmitting is not an implementation detail: the peer is half duplex
//! too and needs time to turn its radio from TX to RX before our reply
//! goes on air.
//!
//! Turnaround phases:
//!
//! ```text
//! Idle ── start ──> Listening ── frame ──> Echoing ── tx ok ──> WaitingTxDone
//!   ^                   ^                     │ tx err               │ done
//!   └─── stop ──────────┴─────────────────────┴───────<──────────────┘
//! ```
//!
//! Timer messages carry a generation id; anything scheduled before a stop
//! or restart observes a stale id and does nothing. Each received frame
//! schedules exactly one echo, and the radio is never asked to transmit
//! while an echo is already in flight.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::actor::{mailbox, Inbox, Mailbox, WeakMailbox};
use crate::config::EchoConfig;
use crate::error::LinkError;
use crate::event_sink::EventSink;
use crate::radio::{next_subscriber_id, RadioBackend, RadioEvent, RxFrame, TxOutcome};
use crate::util::hex::encode_hex;
use crate::util::logging::LogThrottle;

const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Settling delay between subscribing and the first receive arm.
const INITIAL_ARM_DELAY: Duration = Duration::from_millis(100);

/// Retry period when arming the receiver fails.
const ARM_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Overrides applied at `start`; `None` keeps the previous value.
#[derive(Debug, Default, Clone)]
pub struct EchoOptions {
    pub prefix: Option<Vec<u8>>,
    pub delay_ms: Option<u64>,
}

/// Counter snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoStats {
    pub running: bool,
    /// Frames accepted for echoing.
    pub rx_count: u64,
    /// Echo transmissions submitted.
    pub tx_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Listening,
    Echoing,
    WaitingTxDone,
}

enum Msg {
    Start {
        opts: EchoOptions,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    ArmRx {
        id: u64,
    },
    EchoTx {
        id: u64,
        payload: Vec<u8>,
    },
    Event(RadioEvent),
    Stats {
        reply: oneshot::Sender<EchoStats>,
    },
}

/// Cloneable handle to the echo responder actor.
#[derive(Clone)]
pub struct EchoHandle {
    mailbox: Mailbox<Msg>,
}

impl EchoHandle {
    /// Spawn the actor in the idle state with `defaults` as the initial
    /// prefix and turnaround delay.
    pub fn spawn(
        radio: Arc<dyn RadioBackend>,
        sink: Arc<dyn EventSink>,
        defaults: &EchoConfig,
    ) -> Self {
        let (mb, inbox) = mailbox();
        let echo = Echo {
            radio,
            sink,
            mailbox: mb.downgrade(),
            running: false,
            phase: Phase::Idle,
            prefix: defaults.prefix.clone().into_bytes(),
            delay: Duration::from_millis(defaults.delay_ms),
            rx_count: 0,
            tx_count: 0,
            generation: 0,
            subscriber: None,
            arm_throttle: LogThrottle::new(Duration::from_secs(30), 3),
        };
        tokio::spawn(echo.run(inbox));
        Self { mailbox: mb }
    }

    /// Subscribe to the radio and start listening. Fails with
    /// `AlreadyRunning` when the responder is active.
    pub async fn start(&self, opts: EchoOptions) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Msg::Start { opts, reply }, CALL_TIMEOUT)
            .await?
    }

    /// Unsubscribe and go idle. Idempotent; timers already scheduled
    /// observe the stale generation and do nothing.
    pub async fn stop(&self) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Msg::Stop { reply }, CALL_TIMEOUT)
            .await
    }

    pub async fn stats(&self) -> Result<EchoStats, LinkError> {
        self.mailbox
            .call(|reply| Msg::Stats { reply }, CALL_TIMEOUT)
            .await
    }
}

struct Echo {
    radio: Arc<dyn RadioBackend>,
    sink: Arc<dyn EventSink>,
    mailbox: WeakMailbox<Msg>,
    running: bool,
    phase: Phase,
    prefix: Vec<u8>,
    delay: Duration,
    rx_count: u64,
    tx_count: u64,
    generation: u64,
    subscriber: Option<u32>,
    arm_throttle: LogThrottle,
}

impl Echo {
    async fn run(mut self, mut inbox: Inbox<Msg>) {
        while let Some(msg) = inbox.recv().await {
            match msg {
                Msg::Start { opts, reply } => {
                    let _ = reply.send(self.start(opts));
                }
                Msg::Stop { reply } => {
                    self.stop();
                    let _ = reply.send(());
                }
                Msg::ArmRx { id } => self.arm_rx(id).await,
                Msg::EchoTx { id, payload } => self.echo_tx(id, payload).await,
                Msg::Event(event) => self.handle_event(event),
                Msg::Stats { reply } => {
                    let _ = reply.send(EchoStats {
                        running: self.running,
                        rx_count: self.rx_count,
                        tx_count: self.tx_count,
                    });
                }
            }
        }
        debug!("echo actor stopped");
    }

    fn start(&mut self, opts: EchoOptions) -> Result<(), LinkError> {
        if self.running {
            return Err(LinkError::AlreadyRunning("echo responder"));
        }
        if let Some(prefix) = opts.prefix {
            self.prefix = prefix;
        }
        if let Some(delay_ms) = opts.delay_ms {
            self.delay = Duration::from_millis(delay_ms);
        }
        self.running = true;
        self.generation += 1;

        // Pump radio events into our own inbox so they are serialized
        // with the timer messages.
        let id = next_subscriber_id();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        self.radio.subscribe(id, events_tx);
        self.subscriber = Some(id);
        let mb = self.mailbox.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if !mb.cast(Msg::Event(event)) {
                    break;
                }
            }
        });

        self.sink.event("echo_started");
        debug!(
            "echo started: prefix {} bytes, turnaround {:?}",
            self.prefix.len(),
            self.delay
        );
        self.schedule_arm(INITIAL_ARM_DELAY);
        self.phase = Phase::Listening;
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(id) = self.subscriber.take() {
            self.radio.unsubscribe(id);
        }
        if self.running {
            self.sink.event("echo_stopped");
        }
        self.running = false;
        self.generation += 1;
        self.phase = Phase::Idle;
    }

    async fn arm_rx(&mut self, id: u64) {
        if !self.running || id != self.generation {
            return;
        }
        match self.radio.receive_mode(0).await {
            Ok(()) => debug!("receiver armed"),
            Err(e) => {
                if self.arm_throttle.allow() {
                    warn!("arming receiver failed ({e}), retrying in {ARM_RETRY_DELAY:?}");
                }
                self.schedule_arm(ARM_RETRY_DELAY);
            }
        }
    }

    async fn echo_tx(&mut self, id: u64, payload: Vec<u8>) {
        if !self.running || id != self.generation || self.phase != Phase::Echoing {
            return;
        }

        self.tx_count += 1;
        self.sink.tx(&payload, &encode_hex(&payload));
        match self.radio.transmit(payload).await {
            Ok(TxOutcome::Ok) => {
                self.phase = Phase::WaitingTxDone;
            }
            Ok(outcome) => {
                warn!("echo transmit did not complete: {outcome:?}");
                self.back_to_listening();
            }
            Err(e) => {
                warn!("echo transmit failed: {e}");
                self.back_to_listening();
            }
        }
    }

    fn handle_event(&mut self, event: RadioEvent) {
        if !self.running {
            return;
        }
        match event {
            RadioEvent::Frame(frame) => self.handle_frame(frame),
            RadioEvent::TxDone => {
                if self.phase == Phase::WaitingTxDone {
                    self.sink.event("tx_ok");
                    self.back_to_listening();
                }
            }
            RadioEvent::TxError => {
                if self.phase == Phase::WaitingTxDone {
                    self.sink.event("tx_error");
                    self.back_to_listening();
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: RxFrame) {
        if self.phase != Phase::Listening {
            // One echo in flight at a time; extra frames are dropped.
            debug!(
                "frame of {} bytes ignored in phase {:?}",
                frame.bytes.len(),
                self.phase
            );
            return;
        }

        self.rx_count += 1;
        self.sink.rx(
            &frame.bytes,
            &encode_hex(&frame.bytes),
            frame.rssi_dbm,
            frame.snr_db,
        );

        let mut payload = self.prefix.clone();
        payload.extend_from_slice(&frame.bytes);

        // Give the peer time to turn its radio around before replying.
        let mb = self.mailbox.clone();
        let id = self.generation;
        let delay = self.delay;
        tokio::spawn(async move {
            sleep(delay).await;
            mb.cast(Msg::EchoTx { id, payload });
        });
        self.phase = Phase::Echoing;
    }

    fn back_to_listening(&mut self) {
        self.phase = Phase::Listening;
        self.mailbox.cast(Msg::ArmRx {
            id: self.generation,
        });
    }

    fn schedule_arm(&self, delay: Duration) {
        let mb = self.mailbox.clone();
        let id = self.generation;
        tokio::spawn(async move {
            sleep(delay).await;
            mb.cast(Msg::ArmRx { id });
        });
    }
}
