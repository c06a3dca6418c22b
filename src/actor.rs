//! # Actor Primitives
//!
//! Every stateful component in this crate (SX1276 driver, RN2903 modem,
//! beacon, echo responder) runs as a single tokio task that owns its state
//! and drains an mpsc inbox. That serializes register access sequences and
//! mode transitions without locks. This module provides the two message
//! primitives the components share:
//!
//! - `call`: request/reply with an explicit timeout (a `oneshot` reply
//!   channel embedded in the message),
//! - `cast`: fire-and-forget.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::error::LinkError;

/// Sending side of an actor inbox.
///
/// Cloneable; the actor task holds the matching [`Inbox`]. When the actor
/// exits, all calls fail with [`LinkError::NotConnected`].
#[derive(Debug)]
pub struct Mailbox<M> {
    tx: mpsc::UnboundedSender<M>,
}

/// Receiving side of an actor inbox.
pub type Inbox<M> = mpsc::UnboundedReceiver<M>;

/// Create a connected mailbox/inbox pair.
pub fn mailbox<M>() -> (Mailbox<M>, Inbox<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Mailbox { tx }, rx)
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> Mailbox<M> {
    /// Fire-and-forget send. Returns `false` if the actor has exited.
    pub fn cast(&self, msg: M) -> bool {
        self.tx.send(msg).is_ok()
    }

    /// A sender that does not keep the actor alive. Actors use this for
    /// self-scheduled timer messages; were they to hold a strong sender,
    /// their inbox could never close and the task would leak once every
    /// external handle is gone.
    pub fn downgrade(&self) -> WeakMailbox<M> {
        WeakMailbox {
            tx: self.tx.downgrade(),
        }
    }

    /// Request/reply with a deadline.
    ///
    /// `make` embeds the reply sender into the message. The reply arrives
    /// through the oneshot or the call fails with `Timeout`; a dropped
    /// reply sender (actor exited mid-request) maps to `NotConnected`.
    pub async fn call<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> M,
        wait: Duration,
    ) -> Result<R, LinkError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| LinkError::NotConnected)?;
        match timeout(wait, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(LinkError::NotConnected),
            Err(_) => Err(LinkError::Timeout("actor reply")),
        }
    }
}

/// Non-owning counterpart of [`Mailbox`].
#[derive(Debug)]
pub struct WeakMailbox<M> {
    tx: mpsc::WeakUnboundedSender<M>,
}

impl<M> Clone for WeakMailbox<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> WeakMailbox<M> {
    /// Send if the actor is still alive. Returns `false` otherwise.
    pub fn cast(&self, msg: M) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(msg).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Msg {
        Add(u32, oneshot::Sender<u32>),
        Bump,
    }

    #[tokio::test]
    async fn test_call_and_cast() {
        let (mb, mut inbox) = mailbox::<Msg>();
        tokio::spawn(async move {
            let mut total = 0u32;
            while let Some(msg) = inbox.recv().await {
                match msg {
                    Msg::Add(n, reply) => {
                        total += n;
                        let _ = reply.send(total);
                    }
                    Msg::Bump => total += 1,
                }
            }
        });

        assert!(mb.cast(Msg::Bump));
        let total = mb
            .call(|reply| Msg::Add(2, reply), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_call_after_actor_exit() {
        let (mb, inbox) = mailbox::<Msg>();
        drop(inbox);
        let err = mb
            .call(|reply| Msg::Add(1, reply), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
    }
}
