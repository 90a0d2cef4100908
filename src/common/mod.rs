//! 공통 모듈
//!
//! 리스너, 연결 핸들러, 컨트롤러가 함께 쓰는 타입, 에러, 로그 피드를 정의합니다.

pub mod connection_state;
pub mod errors;
pub mod log_feed;
pub mod monitor;
pub mod types;

// 공통 타입들을 재내보내기
pub use connection_state::*;
pub use errors::*;
pub use log_feed::*;
pub use monitor::*;
pub use types::*;
