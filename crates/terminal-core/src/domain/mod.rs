//! 도메인 모델.

pub mod bar;
pub mod book;

pub use bar::OhlcvBar;
pub use book::{BookMessage, PriceLevel, PriceSource};
