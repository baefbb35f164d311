//! # Terminal Stream
//!
//! 실시간 시장 데이터 팬아웃과 OHLCV 집계 코어.
//!
//! ```text
//! 업스트림 피드 ─┬─> MarketBridge ─> Hub ─> ClientSession 송신 큐 ─> 뷰어
//!               └─> PriceTap ─> OhlcvAggregator ─> OhlcvStore (upsert)
//! ```
//!
//! - [`hub`]: 연결 레지스트리와 구독 인덱스를 소유하는 단일 이벤트 루프
//! - [`session`]: 뷰어 연결별 reader/writer
//! - [`bridge`]: 마켓별 pub/sub 채널을 Hub 브로드캐스트로 연결
//! - [`aggregator`]: 다섯 해상도의 OHLCV 봉 상태 기계
//! - [`service`]: 위 구성 요소의 시작과 정리

pub mod aggregator;
pub mod bridge;
pub mod config;
pub mod error;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod service;
pub mod session;
pub mod tap;

pub use aggregator::{CurrentBar, OhlcvAggregator, PriceUpdate};
pub use bridge::MarketBridge;
pub use config::{
    AggregatorConfig, HubConfig, ServerConfig, SessionConfig, StoreConfig, StreamConfig,
    TransportConfig,
};
pub use error::{Result, StreamError};
pub use hub::{Hub, HubHandle, HubStats, Payload, SessionId};
pub use server::AppState;
pub use service::{ServiceConfig, StreamService};
pub use session::{ClientSession, ControlFrame};
pub use tap::PriceTap;
