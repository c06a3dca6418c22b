//! # Beacon Engine
//!
//! Transmits a fixed message on a fixed period so the peer end of the link
//! has something to measure. One actor owns the schedule; ticks carry a
//! generation id so a stale timer fired after `stop` (or a restart) is a
//! no-op. The next tick is scheduled only after the transmit call has
//! returned, so transmissions never overlap however slow the radio is.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::actor::{mailbox, Inbox, Mailbox, WeakMailbox};
use crate::config::BeaconConfig;
use crate::error::LinkError;
use crate::event_sink::EventSink;
use crate::radio::{RadioBackend, TxOutcome};
use crate::util::hex::encode_hex;

const CALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Overrides applied at `start`; `None` keeps the previous value.
#[derive(Debug, Default, Clone)]
pub struct BeaconOptions {
    pub message: Option<Vec<u8>>,
    pub interval_ms: Option<u64>,
}

/// Counter snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconStats {
    pub running: bool,
    /// Transmissions submitted, successful or not.
    pub tx_count: u64,
    /// Submissions that did not complete with transmit-done.
    pub tx_failures: u64,
}

enum Msg {
    Start {
        opts: BeaconOptions,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Tick {
        id: u64,
    },
    Stats {
        reply: oneshot::Sender<BeaconStats>,
    },
}

/// Cloneable handle to the beacon actor.
#[derive(Clone)]
pub struct BeaconHandle {
    mailbox: Mailbox<Msg>,
}

impl BeaconHandle {
    /// Spawn the actor in the stopped state with `defaults` as the initial
    /// message and interval.
    pub fn spawn(
        radio: Arc<dyn RadioBackend>,
        sink: Arc<dyn EventSink>,
        defaults: &BeaconConfig,
    ) -> Self {
        let (mb, inbox) = mailbox();
        let beacon = Beacon {
            radio,
            sink,
            mailbox: mb.downgrade(),
            running: false,
            message: defaults.message.clone().into_bytes(),
            interval: Duration::from_millis(defaults.interval_ms),
            tx_count: 0,
            tx_failures: 0,
            tick_id: 0,
        };
        tokio::spawn(beacon.run(inbox));
        Self { mailbox: mb }
    }

    /// Start beaconing. The first transmission is immediate. Fails with
    /// `AlreadyRunning` when the beacon is active.
    pub async fn start(&self, opts: BeaconOptions) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Msg::Start { opts, reply }, CALL_TIMEOUT)
            .await?
    }

    /// Stop beaconing. Idempotent.
    pub async fn stop(&self) -> Result<(), LinkError> {
        self.mailbox
            .call(|reply| Msg::Stop { reply }, CALL_TIMEOUT)
            .await
    }

    pub async fn stats(&self) -> Result<BeaconStats, LinkError> {
        self.mailbox
            .call(|reply| Msg::Stats { reply }, CALL_TIMEOUT)
            .await
    }
}

struct Beacon {
    radio: Arc<dyn RadioBackend>,
    sink: Arc<dyn EventSink>,
    mailbox: WeakMailbox<Msg>,
    running: bool,
    message: Vec<u8>,
    interval: Duration,
    tx_count: u64,
    tx_failures: u64,
    tick_id: u64,
}

impl Beacon {
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
                Msg::Tick { id } => self.tick(id).await,
                Msg::Stats { reply } => {
                    let _ = reply.send(BeaconStats {
                        running: self.running,
                        tx_count: self.tx_count,
                        tx_failures: self.tx_failures,
                    });
                }
            }
        }
        debug!("beacon actor stopped");
    }

    fn start(&mut self, opts: BeaconOptions) -> Result<(), LinkError> {
        if self.running {
            return Err(LinkError::AlreadyRunning("beacon"));
        }
        if let Some(message) = opts.message {
            if message.is_empty() || message.len() > 255 {
                return Err(LinkError::InvalidParam(format!(
                    "beacon message length {} out of range 1..=255",
                    message.len()
                )));
            }
            self.message = message;
        }
        if let Some(interval_ms) = opts.interval_ms {
            self.interval = Duration::from_millis(interval_ms);
        }
        self.running = true;
        self.tick_id += 1;
        self.sink.event("beacon_started");
        debug!(
            "beacon started: {} bytes every {:?}",
            self.message.len(),
            self.interval
        );
        // First transmission happens right away.
        self.mailbox.cast(Msg::Tick { id: self.tick_id });
        Ok(())
    }

    fn stop(&mut self) {
        if self.running {
            self.sink.event("beacon_stopped");
        }
        self.running = false;
        // Invalidate any tick already in flight.
        self.tick_id += 1;
    }

    async fn tick(&mut self, id: u64) {
        if !self.running || id != self.tick_id {
            return;
        }

        self.tx_count += 1;
        self.sink.tx(&self.message, &encode_hex(&self.message));
        match self.radio.transmit(self.message.clone()).await {
            Ok(TxOutcome::Ok) => self.sink.event("tx_ok"),
            Ok(outcome) => {
                self.tx_failures += 1;
                self.sink.event("tx_error");
                warn!("beacon transmit did not complete: {outcome:?}");
            }
            Err(e) => {
                self.tx_failures += 1;
                self.sink.event("tx_error");
                warn!("beacon transmit failed: {e}");
            }
        }

        // Schedule the next tick only now that the transmit call has
        // returned; ticks can therefore never overlap.
        let mb = self.mailbox.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            sleep(interval).await;
            mb.cast(Msg::Tick { id });
        });
    }
}
