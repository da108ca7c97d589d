//! Channel fan-out.
//!
//! Interested parties subscribe once and receive the next channel the core
//! sets up. Delivery drains the queue, so each subscription sees exactly
//! one channel; subscribing again picks up the one after that.

use crate::Channel;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// One-shot subscriber queue for newly established channels.
#[derive(Default)]
pub struct ChannelSubscribers {
    pending: VecDeque<oneshot::Sender<Channel>>,
}

impl ChannelSubscribers {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a subscriber for the next relayed channel.
    pub fn subscribe(&mut self, subscriber: oneshot::Sender<Channel>) {
        self.pending.push_back(subscriber);
    }

    /// Deliver `channel` to every subscriber enqueued so far.
    pub fn relay(&mut self, channel: &Channel) {
        for subscriber in self.pending.drain(..) {
            // A dropped receiver just misses its channel.
            let _ = subscriber.send(channel.clone());
        }
    }

    /// Number of waiting subscribers.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether anyone is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
