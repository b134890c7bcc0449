//! Broadcast drivers: one ticking task per session plus one aggregate task.
//!
//! A driver reads clocks at a fixed rate and publishes the resulting frame
//! to its channel, whether or not anyone is listening. `DriverSupervisor`
//! owns the liveness flags and guarantees at most one driver per session
//! key and at most one aggregate driver.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use shotclock_core::{PushFrame, SessionRegistry};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::IdlePolicy;
use crate::hub::{ChannelHub, ChannelId, encode_frame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    pub session_period: Duration,
    pub aggregate_period: Duration,
    pub idle_policy: IdlePolicy,
}

#[derive(Default)]
struct LivenessFlags {
    sessions: HashSet<String>,
    aggregate: bool,
}

struct SupervisorInner {
    registry: Arc<SessionRegistry>,
    hub: ChannelHub,
    settings: DriverSettings,
    cancel: CancellationToken,
    tracker: TaskTracker,
    flags: Mutex<LivenessFlags>,
}

#[derive(Clone)]
pub struct DriverSupervisor {
    inner: Arc<SupervisorInner>,
}

impl DriverSupervisor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        hub: ChannelHub,
        settings: DriverSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                registry,
                hub,
                settings,
                cancel,
                tracker: TaskTracker::new(),
                flags: Mutex::new(LivenessFlags::default()),
            }),
        }
    }

    /// Start the driver for `key` unless one is already running. Returns
    /// `true` if this call spawned it. Must be called inside a tokio runtime.
    pub fn ensure_session(&self, key: &str) -> bool {
        {
            let mut flags = self.inner.flags.lock();
            if !flags.sessions.insert(key.to_string()) {
                tracing::trace!(session = %key, "session driver already running");
                return false;
            }
        }

        tracing::debug!(session = %key, "starting session driver");
        let supervisor = self.clone();
        let key = key.to_string();
        self.inner
            .tracker
            .spawn(async move { supervisor.run_session_driver(key).await });
        true
    }

    /// Start the aggregate driver unless it is already running.
    pub fn ensure_aggregate(&self) -> bool {
        {
            let mut flags = self.inner.flags.lock();
            if flags.aggregate {
                tracing::trace!("aggregate driver already running");
                return false;
            }
            flags.aggregate = true;
        }

        tracing::debug!("starting aggregate driver");
        let supervisor = self.clone();
        self.inner
            .tracker
            .spawn(async move { supervisor.run_aggregate_driver().await });
        true
    }

    pub fn is_session_running(&self, key: &str) -> bool {
        self.inner.flags.lock().sessions.contains(key)
    }

    pub fn is_aggregate_running(&self) -> bool {
        self.inner.flags.lock().aggregate
    }

    pub fn active_session_drivers(&self) -> usize {
        self.inner.flags.lock().sessions.len()
    }

    /// Wait for every driver to exit after the cancellation token fired.
    pub async fn wait_stopped(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    async fn run_session_driver(self, key: String) {
        let channel = ChannelId::session(key.as_str());
        let mut ticker = interval(self.inner.settings.session_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let reading = self.inner.registry.read(&key, Instant::now());
            if reading.expired {
                tracing::info!(session = %key, "shot clock expired");
            }
            self.publish(&channel, &PushFrame::Tick(reading.into()));

            if self.release_session_if_idle(&key, &channel) {
                tracing::debug!(session = %key, "session driver stopped: no observers");
                return;
            }
        }

        self.inner.flags.lock().sessions.remove(&key);
        tracing::debug!(session = %key, "session driver cancelled");
    }

    async fn run_aggregate_driver(self) {
        let channel = ChannelId::Aggregate;
        let mut ticker = interval(self.inner.settings.aggregate_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = self.inner.registry.aggregate(Instant::now());
            self.publish(&channel, &PushFrame::Clocks(snapshot));

            if self.release_aggregate_if_idle(&channel) {
                tracing::debug!("aggregate driver stopped: no observers");
                return;
            }
        }

        self.inner.flags.lock().aggregate = false;
        tracing::debug!("aggregate driver cancelled");
    }

    fn publish(&self, channel: &ChannelId, frame: &PushFrame) {
        match encode_frame(frame) {
            Ok(encoded) => {
                let reached = self.inner.hub.publish(channel, encoded);
                tracing::trace!(channel = %channel, reached, "published frame");
            }
            Err(e) => tracing::warn!(channel = %channel, error = %e, "failed to encode frame"),
        }
    }

    // The audience check and the flag release happen under the flags lock,
    // so a concurrent `ensure_session` either sees the flag (and this driver
    // saw a non-empty audience) or spawns a replacement after release.
    fn release_session_if_idle(&self, key: &str, channel: &ChannelId) -> bool {
        if self.inner.settings.idle_policy != IdlePolicy::StopWhenIdle {
            return false;
        }
        let mut flags = self.inner.flags.lock();
        if self.inner.hub.audience(channel) > 0 {
            return false;
        }
        flags.sessions.remove(key);
        true
    }

    fn release_aggregate_if_idle(&self, channel: &ChannelId) -> bool {
        if self.inner.settings.idle_policy != IdlePolicy::StopWhenIdle {
            return false;
        }
        let mut flags = self.inner.flags.lock();
        if self.inner.hub.audience(channel) > 0 {
            return false;
        }
        flags.aggregate = false;
        true
    }
}
