//! 클라이언트 세션 (reader/writer 쌍).
//!
//! 연결 하나마다 reader와 writer가 독립적으로 실행되며 송신 큐 하나만 공유합니다.
//!
//! - **reader**: 프레임 크기 제한과 pong으로 갱신되는 읽기 데드라인을 적용하고,
//!   제어 프레임을 해석해 Hub에 구독/해제를 요청합니다. 잘못된 프레임은 기록 후 버립니다.
//!   읽기 에러나 종료 시 Hub에 해제를 요청합니다.
//! - **writer**: 송신 큐를 비우며 이미 쌓여 있던 메시지를 개행으로 이어 한 프레임으로 씁니다.
//!   ping 주기마다 ping을 보내고, 큐가 닫히면 close 프레임을 보낸 뒤 종료합니다.
//!
//! 세션 하나가 구독할 수 있는 마켓 수는 `max_subscriptions`로 제한됩니다.
//! 마켓마다 업스트림 리스너가 하나씩 생기므로 한 뷰어가 업스트림 연결을 무한히 늘릴 수 없습니다.
//!
//! 소켓은 axum `Message`의 `Stream`/`Sink`라면 무엇이든 받으므로
//! 테스트에서는 채널 쌍으로 대신할 수 있습니다.

mod frame;

pub use frame::ControlFrame;

use std::collections::HashSet;
use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use terminal_core::MarketId;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Result, StreamError};
use crate::hub::{HubHandle, Payload, SessionId};
use crate::metrics;

/// 뷰어 연결 하나에 대한 세션.
pub struct ClientSession {
    id: SessionId,
    hub: HubHandle,
    config: SessionConfig,
}

impl ClientSession {
    /// 새로운 세션 생성.
    pub fn new(hub: HubHandle, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new_v4(),
            hub,
            config,
        }
    }

    /// 세션 ID.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// 연결이 끝날 때까지 세션을 실행합니다.
    ///
    /// writer는 별도 태스크로, reader는 현재 태스크에서 실행됩니다.
    /// 어느 쪽이 먼저 끝나든 다른 쪽도 정리되고 Hub에서 해제됩니다.
    pub async fn run<R, W, E>(self, stream: R, sink: W)
    where
        R: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
    {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        if self.hub.register(self.id, tx).await.is_err() {
            warn!(session_id = %self.id, "Hub closed, rejecting session");
            return;
        }
        info!(session_id = %self.id, "Client session started");
        metrics::increment_websocket_connections();

        let writer_done = CancellationToken::new();
        let writer = tokio::spawn(write_pump(
            sink,
            rx,
            self.id,
            self.config.clone(),
            writer_done.clone(),
        ));

        self.read_pump(stream, writer_done).await;

        let _ = self.hub.unregister(self.id).await;
        if let Err(e) = writer.await {
            warn!(session_id = %self.id, error = %e, "Writer task failed");
        }

        metrics::decrement_websocket_connections();
        info!(session_id = %self.id, "Client session ended");
    }

    async fn read_pump<R, E>(&self, mut stream: R, writer_done: CancellationToken)
    where
        R: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
    {
        let mut markets: HashSet<MarketId> = HashSet::new();
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let next = tokio::select! {
                _ = writer_done.cancelled() => {
                    debug!(session_id = %self.id, "Writer stopped, closing reader");
                    break;
                }
                next = tokio::time::timeout_at(deadline, stream.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    info!(session_id = %self.id, "Read deadline exceeded");
                    break;
                }
                Ok(None) => {
                    debug!(session_id = %self.id, "Peer closed the stream");
                    break;
                }
                Ok(Some(Err(e))) => {
                    debug!(session_id = %self.id, error = %e, "WebSocket read error");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            let payload: &[u8] = match &message {
                Message::Text(text) => text.as_str().as_bytes(),
                Message::Binary(bytes) => &bytes[..],
                Message::Pong(_) => {
                    deadline = Instant::now() + self.config.pong_wait;
                    continue;
                }
                Message::Ping(_) => continue,
                Message::Close(_) => {
                    debug!(session_id = %self.id, "Close frame received");
                    break;
                }
            };

            if payload.len() > self.config.max_message_size {
                warn!(
                    session_id = %self.id,
                    size = payload.len(),
                    limit = self.config.max_message_size,
                    "Inbound frame exceeds read limit"
                );
                break;
            }

            let frame = match ControlFrame::from_slice(payload) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "Malformed control frame dropped");
                    continue;
                }
            };

            if self.apply(frame, &mut markets).await.is_err() {
                debug!(session_id = %self.id, "Hub closed, closing reader");
                break;
            }
        }
    }

    /// 로컬 구독 집합과 비교해 바뀐 마켓만 Hub에 요청합니다.
    async fn apply(&self, frame: ControlFrame, markets: &mut HashSet<MarketId>) -> Result<()> {
        match frame {
            ControlFrame::Subscribe { market_ids } => {
                for market_id in market_ids {
                    if market_id.is_empty() || markets.contains(&market_id) {
                        continue;
                    }
                    if markets.len() >= self.config.max_subscriptions {
                        warn!(
                            session_id = %self.id,
                            market_id = %market_id,
                            limit = self.config.max_subscriptions,
                            "Subscription limit reached, market ignored"
                        );
                        continue;
                    }
                    markets.insert(market_id.clone());
                    self.hub.subscribe(self.id, market_id).await?;
                }
            }
            ControlFrame::Unsubscribe { market_ids } => {
                for market_id in market_ids {
                    if markets.remove(&market_id) {
                        self.hub.unsubscribe(self.id, market_id).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// 송신 큐를 소켓으로 흘려보냅니다.
///
/// ping은 큐 활동과 무관하게 매 주기마다 보냅니다. 읽기 데드라인은 pong을 받을 때만
/// 갱신되므로, 데이터가 계속 흐르는 연결도 주기적으로 pong을 받아야 끊기지 않습니다.
async fn write_pump<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Payload>,
    session_id: SessionId,
    config: SessionConfig,
    done: CancellationToken,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let ping_period = config.ping_period();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            payload = rx.recv() => {
                let Some(first) = payload else {
                    debug!(session_id = %session_id, "Outbound queue closed");
                    let _ = write_frame(&mut sink, Message::Close(None), config.write_wait).await;
                    break;
                };
                let text = coalesce(first, &mut rx);
                if let Err(e) = write_frame(&mut sink, Message::Text(text.into()), config.write_wait).await {
                    debug!(session_id = %session_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    debug!(session_id = %session_id, error = %e, "Ping write failed");
                    break;
                }
            }
        }
    }

    done.cancel();
}

/// 첫 메시지 뒤에 이미 큐에 있던 메시지를 개행으로 이어 붙입니다.
fn coalesce(first: Payload, rx: &mut mpsc::Receiver<Payload>) -> String {
    let queued = rx.len();
    let mut text = String::from(&*first);
    for _ in 0..queued {
        match rx.try_recv() {
            Ok(next) => {
                text.push('\n');
                text.push_str(&next);
            }
            Err(_) => break,
        }
    }
    text
}

async fn write_frame<W>(sink: &mut W, message: Message, write_wait: Duration) -> Result<()>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match tokio::time::timeout(write_wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StreamError::Socket(e.to_string())),
        Err(_) => Err(StreamError::Socket("write deadline exceeded".to_string())),
    }
}
