//! 스트리밍 코어의 외부 협력자.
//!
//! 이 crate는 다음을 제공합니다:
//! - OHLCV 봉 저장소 (`OhlcvStore`): TimescaleDB 구현과 인메모리 구현
//! - 마켓별 키 기반 pub/sub 전송 (`FeedTransport`): Redis 구현과 인메모리 구현

pub mod error;
pub mod storage;
pub mod transport;

pub use error::{DataError, Result};

pub use storage::memory::MemoryOhlcvStore;
pub use storage::timescale::{Database, DatabaseConfig, TimescaleOhlcvStore};
pub use storage::OhlcvStore;

pub use transport::memory::MemoryFeed;
pub use transport::redis::{RedisConfig, RedisFeed};
pub use transport::{channel_key, FeedMessage, FeedSubscription, FeedTransport};
