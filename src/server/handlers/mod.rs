//! 연결 핸들러 모듈
//!
//! 수락된 클라이언트 연결 하나의 요청-응답 또는 터널 수립을 처리합니다.

pub mod connection;

pub use connection::*;
