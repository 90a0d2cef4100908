//! 서버 유틸리티 모듈

pub mod logging;

pub use logging::*;
