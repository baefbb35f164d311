//! 스트리밍 코어 전반에서 사용되는 공통 타입.

mod resolution;

pub use resolution::*;

/// 마켓 식별자.
pub type MarketId = String;
