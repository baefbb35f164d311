//! 인메모리 pub/sub 전송.
//!
//! tokio broadcast 채널 위에 정확한 채널 구독과 접두사 패턴(`prefix*`) 구독을 제공합니다.
//! 외부 브로커 없이 코어를 임베딩하거나 테스트할 때 사용합니다.
//!
//! 수신자가 모두 사라진 채널은 구독 해제나 다음 발행 때 맵에서 제거됩니다.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::warn;

use super::{FeedMessage, FeedSubscription, FeedTransport};
use crate::error::Result;

const DEFAULT_CAPACITY: usize = 1024;

type SenderMap = HashMap<String, broadcast::Sender<FeedMessage>>;

#[derive(Default)]
struct Channels {
    exact: SenderMap,
    patterns: SenderMap,
}

impl Channels {
    fn map_mut(&mut self, kind: ChannelKind) -> &mut SenderMap {
        match kind {
            ChannelKind::Exact => &mut self.exact,
            ChannelKind::Pattern => &mut self.patterns,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ChannelKind {
    Exact,
    Pattern,
}

/// 프로세스 내부 피드 전송.
#[derive(Clone)]
pub struct MemoryFeed {
    channels: Arc<Mutex<Channels>>,
    capacity: usize,
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryFeed {
    /// 채널당 버퍼 크기를 지정해 생성합니다.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(Channels::default())),
            capacity: capacity.max(1),
        }
    }

    /// 채널에 현재 붙어 있는 구독 수.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.lock()
            .exact
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// 수신자가 남아 있어 맵에 유지되는 채널 수 (정확 + 패턴).
    pub fn channel_count(&self) -> usize {
        let channels = self.lock();
        channels.exact.len() + channels.patterns.len()
    }

    /// 모든 채널을 닫아 전송 단절을 흉내냅니다.
    ///
    /// 열린 구독은 버퍼를 소진한 뒤 `None`을 받습니다.
    pub fn disconnect(&self) {
        let mut channels = self.lock();
        channels.exact.clear();
        channels.patterns.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Channels> {
        lock_channels(&self.channels)
    }

    fn open(&self, kind: ChannelKind, key: &str) -> MemorySubscription {
        let rx = self
            .lock()
            .map_mut(kind)
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        MemorySubscription {
            rx: Some(rx),
            channels: self.channels.clone(),
            kind,
            key: key.to_string(),
        }
    }
}

fn lock_channels(channels: &Mutex<Channels>) -> std::sync::MutexGuard<'_, Channels> {
    // 잠금 안에서 패닉할 코드가 없으므로 poison은 무시합니다.
    channels.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl FeedTransport for MemoryFeed {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn FeedSubscription>> {
        Ok(Box::new(self.open(ChannelKind::Exact, channel)))
    }

    async fn subscribe_pattern(&self, pattern: &str) -> Result<Box<dyn FeedSubscription>> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(Box::new(self.open(ChannelKind::Pattern, prefix)))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let message = FeedMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        let mut channels = self.lock();
        let mut delivered = 0;

        // 구독 해제 없이 버려진 수신자만 남은 채널은 여기서 정리
        channels.exact.retain(|_, tx| tx.receiver_count() > 0);
        channels.patterns.retain(|_, tx| tx.receiver_count() > 0);

        if let Some(tx) = channels.exact.get(channel) {
            delivered += tx.send(message.clone()).unwrap_or(0);
        }
        for (prefix, tx) in &channels.patterns {
            if channel.starts_with(prefix.as_str()) {
                delivered += tx.send(message.clone()).unwrap_or(0);
            }
        }

        Ok(delivered)
    }
}

struct MemorySubscription {
    rx: Option<broadcast::Receiver<FeedMessage>>,
    channels: Arc<Mutex<Channels>>,
    kind: ChannelKind,
    key: String,
}

#[async_trait]
impl FeedSubscription for MemorySubscription {
    async fn next_message(&mut self) -> Option<FeedMessage> {
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Memory feed subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        if self.rx.take().is_none() {
            return Ok(());
        }

        let mut channels = lock_channels(&self.channels);
        let map = channels.map_mut(self.kind);
        if map
            .get(&self.key)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            map.remove(&self.key);
        }
        Ok(())
    }
}
