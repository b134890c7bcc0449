//! Channel hub: publish/subscribe fan-out keyed by channel id.
//!
//! Each channel is a `broadcast` sender plus an audience count. Publishing
//! never blocks and never fails: with no audience the frame is dropped.
//! Observers that fall behind lag and skip frames instead of slowing the
//! publisher or other observers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use shotclock_core::PushFrame;
use tokio::sync::broadcast;

/// Serialized JSON text of one push frame, shared by every receiver.
pub type Frame = Arc<str>;

/// Per-channel buffer. Observers lagging further than this skip ahead.
const CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Session(String),
    Aggregate,
}

impl ChannelId {
    pub fn session(key: impl Into<String>) -> Self {
        ChannelId::Session(key.into())
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Session(key) => write!(f, "session:{key}"),
            ChannelId::Aggregate => f.write_str("aggregate"),
        }
    }
}

/// Encode a push frame once for fan-out.
pub fn encode_frame(frame: &PushFrame) -> Result<Frame, serde_json::Error> {
    serde_json::to_string(frame).map(Frame::from)
}

struct Channel {
    tx: broadcast::Sender<Frame>,
    audience: usize,
}

#[derive(Clone, Default)]
pub struct ChannelHub {
    channels: Arc<Mutex<HashMap<ChannelId, Channel>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a channel's audience. Dropping the subscription leaves it.
    pub fn subscribe(&self, channel: &ChannelId) -> Subscription {
        let mut channels = self.channels.lock();
        let entry = channels.entry(channel.clone()).or_insert_with(|| Channel {
            tx: broadcast::channel(CHANNEL_CAPACITY).0,
            audience: 0,
        });
        entry.audience += 1;
        tracing::debug!(channel = %channel, audience = entry.audience, "observer joined");
        Subscription {
            hub: self.clone(),
            channel: channel.clone(),
            rx: entry.tx.subscribe(),
        }
    }

    fn unsubscribe(&self, channel: &ChannelId) {
        let mut channels = self.channels.lock();
        if let Some(entry) = channels.get_mut(channel) {
            entry.audience = entry.audience.saturating_sub(1);
            tracing::debug!(channel = %channel, audience = entry.audience, "observer left");
            if entry.audience == 0 {
                channels.remove(channel);
            }
        }
    }

    /// Send a frame to every current observer of `channel`. Returns how many
    /// receivers it reached; 0 for an empty or unknown channel.
    pub fn publish(&self, channel: &ChannelId, frame: Frame) -> usize {
        let channels = self.channels.lock();
        match channels.get(channel) {
            Some(entry) => entry.tx.send(frame).unwrap_or(0),
            None => 0,
        }
    }

    pub fn audience(&self, channel: &ChannelId) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map_or(0, |entry| entry.audience)
    }
}

/// One observer's membership in a channel.
pub struct Subscription {
    hub: ChannelHub,
    channel: ChannelId,
    rx: broadcast::Receiver<Frame>,
}

impl Subscription {
    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub async fn recv(&mut self) -> Result<Frame, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    /// Drop frames queued before this call. Used right after sending an
    /// immediate snapshot so older ticks are never delivered after it.
    pub fn discard_pending(&mut self) {
        self.rx = self.rx.resubscribe();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.channel);
    }
}
