use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

/// 프록시 리스너 상태
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum ProxyState {
    #[default]
    Stopped,
    Starting,
    Running,
    /// 바인드 실패 등으로 현재 실행이 중단됨
    Failed(String),
}

impl ProxyState {
    /// Label shown next to the status indicator.
    pub fn label(&self) -> &'static str {
        match self {
            ProxyState::Stopped => "Stopped",
            ProxyState::Starting => "Starting...",
            ProxyState::Running => "Running",
            ProxyState::Failed(_) => "Error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProxyState::Running)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            ProxyState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyState::Failed(reason) => write!(f, "{}: {}", self.label(), reason),
            _ => f.write_str(self.label()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Host and port a device enters in its HTTP proxy settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Point-in-time view for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub reason: Option<String>,
    pub endpoint: Option<ProxyEndpoint>,
    pub active_connections: usize,
    pub logs: Vec<LogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels() {
        assert_eq!(ProxyState::Stopped.label(), "Stopped");
        assert_eq!(ProxyState::Starting.label(), "Starting...");
        assert_eq!(ProxyState::Running.label(), "Running");
        assert_eq!(ProxyState::Failed("busy".into()).label(), "Error");
        assert_eq!(
            ProxyState::Failed("port busy".into()).to_string(),
            "Error: port busy"
        );
    }

    #[test]
    fn test_only_running_counts_as_running() {
        assert!(ProxyState::Running.is_running());
        assert!(!ProxyState::Starting.is_running());
        assert!(!ProxyState::Stopped.is_running());
        assert!(!ProxyState::Failed(String::new()).is_running());
    }

    #[test]
    fn test_log_entry_display_has_timestamp_prefix() {
        let entry = LogEntry::new("hello");
        let rendered = entry.to_string();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] hello"));
    }

    #[test]
    fn test_failed_state_serializes_reason() {
        let json = serde_json::to_value(ProxyState::Failed("in use".into())).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "in use");
    }
}
