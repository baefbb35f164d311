//! # Terminal Core
//!
//! 실시간 시장 데이터 스트리밍 코어에서 공통으로 사용하는 도메인 타입을 제공합니다.
//!
//! - 봉 해상도(`Resolution`)와 버킷 정렬
//! - OHLCV 봉 레코드
//! - 업스트림 호가 메시지 모델과 가격 도출
//! - 로깅 인프라

pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
