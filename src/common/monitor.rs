//! Shared status cell and log feed observed by the UI.
//!
//! Network tasks are the only writers. Every state change and log append
//! happens under one lock, so readers see them in a single order.

use crate::common::log_feed::LogFeed;
use crate::common::types::{LogEntry, ProxyState};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug)]
pub struct ProxyMonitor {
    feed: Mutex<LogFeed>,
    state: watch::Sender<ProxyState>,
    events: broadcast::Sender<LogEntry>,
}

impl ProxyMonitor {
    pub fn new(log_capacity: usize) -> Self {
        let (state, _) = watch::channel(ProxyState::Stopped);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            feed: Mutex::new(LogFeed::new(log_capacity)),
            state,
            events,
        }
    }

    fn lock_feed(&self) -> MutexGuard<'_, LogFeed> {
        self.feed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(Severity::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.record(Severity::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(Severity::Error, message.into());
    }

    pub fn record(&self, severity: Severity, message: String) {
        let mut feed = self.lock_feed();
        self.append(&mut feed, severity, message);
    }

    /// Replace the current state and append its log entry atomically.
    pub fn transition(&self, next: ProxyState, message: impl Into<String>) {
        let severity = match next {
            ProxyState::Failed(_) => Severity::Error,
            _ => Severity::Info,
        };
        let mut feed = self.lock_feed();
        let previous = self.state.send_replace(next);
        tracing::debug!("Proxy state {:?} -> {:?}", previous, *self.state.borrow());
        self.append(&mut feed, severity, message.into());
    }

    fn append(&self, feed: &mut LogFeed, severity: Severity, message: String) {
        match severity {
            Severity::Info => info!("{}", message),
            Severity::Warn => warn!("{}", message),
            Severity::Error => error!("{}", message),
        }

        let entry = LogEntry::new(message);
        feed.push(entry.clone());
        // 구독자가 없으면 무시
        let _ = self.events.send(entry);
    }

    pub fn state(&self) -> ProxyState {
        self.state.borrow().clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock_feed().snapshot()
    }

    pub fn log_count(&self) -> usize {
        self.lock_feed().len()
    }

    pub fn watch_state(&self) -> watch::Receiver<ProxyState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }
}

impl Default for ProxyMonitor {
    fn default() -> Self {
        Self::new(crate::common::log_feed::DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_updates_state_and_logs_once() {
        let monitor = ProxyMonitor::default();
        monitor.transition(ProxyState::Starting, "starting");
        monitor.transition(ProxyState::Running, "running");

        assert_eq!(monitor.state(), ProxyState::Running);
        let messages: Vec<String> = monitor.logs().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["starting", "running"]);
    }

    #[test]
    fn test_feed_is_bounded() {
        let monitor = ProxyMonitor::default();
        for i in 0..75 {
            monitor.info(format!("line {}", i));
        }

        let logs = monitor.logs();
        assert_eq!(logs.len(), 50);
        assert_eq!(logs.first().unwrap().message, "line 25");
        assert_eq!(logs.last().unwrap().message, "line 74");
    }

    #[tokio::test]
    async fn test_subscribers_see_entries_in_order() {
        let monitor = ProxyMonitor::default();
        let mut rx = monitor.subscribe();
        let mut state_rx = monitor.watch_state();

        monitor.transition(ProxyState::Failed("busy".into()), "bind failed");
        monitor.warn("retry manually");

        assert_eq!(rx.recv().await.unwrap().message, "bind failed");
        assert_eq!(rx.recv().await.unwrap().message, "retry manually");
        assert!(state_rx.has_changed().unwrap());
        assert_eq!(
            *state_rx.borrow_and_update(),
            ProxyState::Failed("busy".into())
        );
    }
}
