//! In-memory topic exchange for publisher tests.
//!
//! [`InMemoryTopicExchange`] behaves like a broker-side topic exchange:
//! queues bind with `*`/`#` patterns and each accepted message is copied into
//! every queue whose pattern matches its routing key (once per queue, even when
//! several of its bindings match).
//!
//! Two buffering modes:
//!
//! - [`InMemoryTopicExchange::new`]: unbounded, messages are routed immediately
//! - [`InMemoryTopicExchange::with_capacity`]: at most `n` messages wait in the
//!   channel buffer; further sends report buffer full until the test calls
//!   [`InMemoryTopicExchange::drain`]

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned mutex

use concord_core::event::EventEnvelope;
use concord_core::exchange::{
    AckFuture, DrainSignal, ExchangeChannel, ExchangeError, TryPublishError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::watch;

/// A message as the exchange received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    /// Exchange named by the publisher
    pub exchange: String,
    /// Envelope exactly as handed over
    pub envelope: EventEnvelope,
}

#[derive(Debug, Default)]
struct ExchangeState {
    bindings: Vec<(String, String)>,
    queues: HashMap<String, Vec<DeliveredMessage>>,
    buffer: VecDeque<DeliveredMessage>,
    accepted: Vec<DeliveredMessage>,
    closed: bool,
}

impl ExchangeState {
    fn route(&mut self, message: DeliveredMessage) {
        let key = message.envelope.routing_key();
        let mut targets: Vec<&String> = self
            .bindings
            .iter()
            .filter(|(_, pattern)| key.matches_pattern(pattern))
            .map(|(queue, _)| queue)
            .collect();
        targets.sort();
        targets.dedup();

        let targets: Vec<String> = targets.into_iter().cloned().collect();
        for queue in targets {
            self.queues.entry(queue).or_default().push(message.clone());
        }
    }
}

/// Topic exchange double with bindings, a finite buffer and manual drain.
///
/// # Example
///
/// ```
/// use concord_testing::InMemoryTopicExchange;
///
/// let exchange = InMemoryTopicExchange::new();
/// exchange.bind("billing", "invoice.#");
/// exchange.bind("audit", "#");
/// assert!(exchange.queue("billing").is_empty());
/// ```
#[derive(Debug)]
pub struct InMemoryTopicExchange {
    state: Mutex<ExchangeState>,
    capacity: Option<usize>,
    drained: DrainSignal,
}

impl InMemoryTopicExchange {
    /// Unbounded exchange that routes on accept.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExchangeState::default()),
            capacity: None,
            drained: DrainSignal::new(),
        }
    }

    /// Exchange whose channel buffer holds at most `capacity` undrained messages.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Bind `queue` to `pattern`.
    pub fn bind(&self, queue: impl Into<String>, pattern: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .bindings
            .push((queue.into(), pattern.into()));
    }

    /// Messages routed to `queue` so far.
    #[must_use]
    pub fn queue(&self, queue: &str) -> Vec<DeliveredMessage> {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Every message the exchange accepted, bound or not.
    #[must_use]
    pub fn accepted(&self) -> Vec<DeliveredMessage> {
        self.state.lock().unwrap().accepted.clone()
    }

    /// Messages waiting in the channel buffer.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    /// Route every buffered message and fire the drain signal.
    pub fn drain(&self) {
        {
            let mut state = self.state.lock().unwrap();
            while let Some(message) = state.buffer.pop_front() {
                state.route(message);
            }
        }
        self.drained.notify_drained();
    }

    /// Simulate a dropped connection: later sends fail, waiters wake.
    pub fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.drained.notify_drained();
    }
}

impl Default for InMemoryTopicExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeChannel for InMemoryTopicExchange {
    fn try_publish(
        &self,
        exchange: &str,
        envelope: &EventEnvelope,
    ) -> Result<AckFuture, TryPublishError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TryPublishError::Failed(ExchangeError::ChannelUnavailable {
                exchange: exchange.to_string(),
            }));
        }

        let message = DeliveredMessage {
            exchange: exchange.to_string(),
            envelope: envelope.clone(),
        };

        match self.capacity {
            Some(capacity) if state.buffer.len() >= capacity => {
                return Err(TryPublishError::BufferFull);
            },
            Some(_) => state.buffer.push_back(message.clone()),
            None => state.route(message.clone()),
        }
        state.accepted.push(message);

        Ok(Box::pin(async { Ok(()) }))
    }

    fn drain_signal(&self) -> watch::Receiver<u64> {
        self.drained.subscribe()
    }
}
