use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// 요청 라인 파싱 실패
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request is not valid UTF-8 text")]
    NotText,

    #[error("no request line")]
    NoRequestLine,

    #[error("CONNECT request without a target")]
    MissingConnectTarget,
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Proxy is already running")]
    AlreadyRunning,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Parsing error: {0}")]
    Parse(#[from] ParseError),

    #[error("Relay error: {0}")]
    Relay(String),
}

impl From<&str> for ProxyError {
    fn from(s: &str) -> Self {
        ProxyError::Relay(s.to_string())
    }
}

impl From<String> for ProxyError {
    fn from(s: String) -> Self {
        ProxyError::Relay(s)
    }
}

pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// 연결 에러인지 확인하는 헬퍼 함수
pub fn is_connection_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
    )
}
