//! Bounded delivery channel between the dispatcher and the worker pool.
//!
//! A single `mpsc` receiver is shared by all workers behind an async mutex,
//! which makes the channel multi-consumer while keeping tokio's bounded
//! backpressure on the sending side.

use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::{Mutex, mpsc};

use super::job::JobId;

/// Message carried by the delivery channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Job(JobId),
    /// Sentinel asking the receiving worker to exit.
    Shutdown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushError {
    Full,
    Closed,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full => f.write_str("delivery channel full"),
            PushError::Closed => f.write_str("delivery channel closed"),
        }
    }
}

/// Result of a timed receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    Delivery(Delivery),
    TimedOut,
    Closed,
}

#[derive(Clone)]
pub struct DeliverySender {
    tx: mpsc::Sender<Delivery>,
}

impl fmt::Debug for DeliverySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverySender")
            .field("depth", &self.depth())
            .field("capacity", &self.max_capacity())
            .finish()
    }
}

impl DeliverySender {
    /// Messages currently buffered and not yet received.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    /// Never blocks.
    pub fn try_push(&self, delivery: Delivery) -> Result<(), PushError> {
        self.tx.try_send(delivery).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

#[derive(Clone)]
pub struct DeliveryReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
}

impl fmt::Debug for DeliveryReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryReceiver")
            .field("consumers", &Arc::strong_count(&self.rx))
            .finish()
    }
}

impl DeliveryReceiver {
    /// Waits at most `timeout`, including time spent queued behind other
    /// workers for the shared receiver.
    pub async fn recv_timeout(&self, timeout: Duration) -> Received {
        let attempt = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        match tokio::time::timeout(timeout, attempt).await {
            Ok(Some(delivery)) => Received::Delivery(delivery),
            Ok(None) => Received::Closed,
            Err(_) => Received::TimedOut,
        }
    }

    /// Empties the buffer without waiting, returning the job ids that were
    /// never picked up. Sentinels are discarded.
    pub async fn drain(&self) -> Vec<JobId> {
        let mut rx = self.rx.lock().await;
        let mut pending = Vec::new();
        while let Ok(delivery) = rx.try_recv() {
            if let Delivery::Job(id) = delivery {
                pending.push(id);
            }
        }
        pending
    }
}

pub fn delivery_channel(capacity: usize) -> (DeliverySender, DeliveryReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        DeliverySender { tx },
        DeliveryReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
