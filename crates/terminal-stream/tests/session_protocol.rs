//! 클라이언트 세션 프로토콜 통합 테스트.
//!
//! WebSocket 대신 채널 쌍을 소켓으로 사용해 세션 reader/writer를 검증합니다:
//! - 구독/해제 제어 프레임과 데이터 전달, 세션별 구독 수 제한
//! - 잘못된 프레임은 무시하고 연결 유지
//! - 크기 초과 프레임, 피어 종료 시 해제와 close 프레임
//! - ping/pong 기반 읽기 데드라인

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use terminal_data::{FeedTransport, MemoryFeed};
use terminal_stream::{
    ClientSession, Hub, HubConfig, HubHandle, HubStats, MarketBridge, SessionConfig,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// 테스트 헬퍼 함수
// ============================================================================

/// 세션 반대편(뷰어) 역할.
struct Viewer {
    outgoing: UnboundedSender<Result<Message, io::Error>>,
    incoming: UnboundedReceiver<Message>,
    task: JoinHandle<()>,
}

impl Viewer {
    fn send_text(&self, text: &str) {
        self.outgoing
            .unbounded_send(Ok(Message::Text(text.to_string().into())))
            .unwrap();
    }

    async fn next(&mut self) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), self.incoming.next())
            .await
            .expect("no frame in time")
    }

    /// 다음 텍스트 프레임을 개행 단위로 나눠 반환합니다.
    async fn next_lines(&mut self) -> Vec<String> {
        match self.next().await {
            Some(Message::Text(text)) => text.as_str().split('\n').map(str::to_string).collect(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}

fn start_hub() -> (MemoryFeed, HubHandle, CancellationToken) {
    let feed = MemoryFeed::default();
    let bridge = MarketBridge::new(Arc::new(feed.clone()), "orderbook:");
    let cancel = CancellationToken::new();
    let (hub, _task) = Hub::spawn(&HubConfig::default(), bridge, cancel.clone());
    (feed, hub, cancel)
}

fn connect(hub: &HubHandle, config: SessionConfig) -> Viewer {
    let (outgoing, server_in) = unbounded();
    let (server_out, incoming) = unbounded();
    let session = ClientSession::new(hub.clone(), config);
    let task = tokio::spawn(session.run(server_in, server_out));
    Viewer {
        outgoing,
        incoming,
        task,
    }
}

async fn eventually_clients(hub: &HubHandle, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.stats().await.unwrap().clients != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client count not reached in time");
}

async fn eventually_subscribers(hub: &HubHandle, market_id: &str, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while hub.stats().await.unwrap().subscriber_count(market_id) != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count not reached in time");
}

// ============================================================================
// 구독과 전달
// ============================================================================

#[tokio::test]
async fn test_subscribe_then_receive_feed_payload() {
    let (feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    viewer.send_text(r#"{"type":"subscribe","market_ids":["0xabc"]}"#);
    eventually_subscribers(&hub, "0xabc", 1).await;
    while feed.subscriber_count("orderbook:0xabc") == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    feed.publish("orderbook:0xabc", r#"{"market":"0xabc"}"#)
        .await
        .unwrap();
    assert_eq!(viewer.next_lines().await, [r#"{"market":"0xabc"}"#]);
}

#[tokio::test]
async fn test_queued_messages_are_coalesced_in_order() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    viewer.send_text(r#"{"type":"subscribe","market_ids":["M1"]}"#);
    eventually_subscribers(&hub, "M1", 1).await;

    for payload in ["p1", "p2", "p3", "p4"] {
        hub.broadcast("M1", payload).await.unwrap();
    }

    let mut lines = Vec::new();
    let mut frames = 0;
    while lines.len() < 4 {
        lines.extend(viewer.next_lines().await);
        frames += 1;
    }
    assert_eq!(lines, ["p1", "p2", "p3", "p4"]);
    assert!(frames <= 4);
}

#[tokio::test]
async fn test_duplicate_subscribe_and_unsubscribe() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    viewer.send_text(r#"{"type":"subscribe","market_ids":["M1","M1","M2"]}"#);
    eventually_subscribers(&hub, "M2", 1).await;
    assert_eq!(hub.stats().await.unwrap().subscriber_count("M1"), 1);

    viewer.send_text(r#"{"type":"unsubscribe","market_ids":["M1","M3"]}"#);
    eventually_subscribers(&hub, "M1", 0).await;

    hub.broadcast("M1", "dropped").await.unwrap();
    hub.broadcast("M2", "kept").await.unwrap();
    assert_eq!(viewer.next_lines().await, ["kept"]);
}

#[tokio::test]
async fn test_subscription_limit_per_session() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(
        &hub,
        SessionConfig {
            max_subscriptions: 2,
            ..Default::default()
        },
    );

    viewer.send_text(r#"{"type":"subscribe","market_ids":["M1","M2","M3"]}"#);
    eventually_subscribers(&hub, "M2", 1).await;
    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.markets(), 2);
    assert_eq!(stats.subscriber_count("M3"), 0);

    // 해제로 자리가 나면 다시 구독 가능
    viewer.send_text(r#"{"type":"unsubscribe","market_ids":["M1"]}"#);
    viewer.send_text(r#"{"type":"subscribe","market_ids":["M3"]}"#);
    eventually_subscribers(&hub, "M3", 1).await;
    assert_eq!(hub.stats().await.unwrap().subscriber_count("M1"), 0);

    hub.broadcast("M3", "third").await.unwrap();
    assert_eq!(viewer.next_lines().await, ["third"]);
}

// ============================================================================
// 잘못된 입력
// ============================================================================

#[tokio::test]
async fn test_malformed_frame_keeps_connection() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    viewer.send_text("not json at all");
    viewer.send_text(r#"{"type":"refresh","market_ids":["M1"]}"#);
    viewer.send_text(r#"{"type":"subscribe","market_ids":["M1"]}"#);
    eventually_subscribers(&hub, "M1", 1).await;

    hub.broadcast("M1", "alive").await.unwrap();
    assert_eq!(viewer.next_lines().await, ["alive"]);
    assert!(!viewer.task.is_finished());
}

#[tokio::test]
async fn test_oversized_frame_closes_session() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    viewer.send_text(r#"{"type":"subscribe","market_ids":["M1"]}"#);
    eventually_subscribers(&hub, "M1", 1).await;

    let huge = format!(
        r#"{{"type":"subscribe","market_ids":["{}"]}}"#,
        "x".repeat(600)
    );
    viewer.send_text(&huge);

    assert_eq!(viewer.next().await, Some(Message::Close(None)));
    assert_eq!(viewer.next().await, None);
    viewer.task.await.unwrap();

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.clients, 0);
    assert_eq!(stats.markets(), 0);
}

// ============================================================================
// 연결 종료
// ============================================================================

#[tokio::test]
async fn test_peer_close_unregisters() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    viewer.send_text(r#"{"type":"subscribe","market_ids":["M1","M2"]}"#);
    eventually_subscribers(&hub, "M2", 1).await;

    viewer.outgoing.unbounded_send(Ok(Message::Close(None))).unwrap();

    assert_eq!(viewer.next().await, Some(Message::Close(None)));
    viewer.task.await.unwrap();
    assert_eq!(hub.stats().await.unwrap(), HubStats::default());
}

#[tokio::test]
async fn test_read_error_unregisters() {
    let (_feed, hub, _cancel) = start_hub();
    let viewer = connect(&hub, SessionConfig::default());
    eventually_clients(&hub, 1).await;

    viewer
        .outgoing
        .unbounded_send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
        .unwrap();

    viewer.task.await.unwrap();
    assert_eq!(hub.stats().await.unwrap().clients, 0);
}

#[tokio::test]
async fn test_hub_shutdown_sends_close() {
    let (_feed, hub, cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());
    eventually_clients(&hub, 1).await;

    cancel.cancel();

    assert_eq!(viewer.next().await, Some(Message::Close(None)));
    viewer.task.await.unwrap();
}

// ============================================================================
// 읽기 데드라인
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_missing_pong_hits_read_deadline() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    // 54초에 ping, 응답이 없으면 60초에 종료
    assert!(matches!(viewer.incoming.next().await, Some(Message::Ping(_))));
    assert_eq!(viewer.incoming.next().await, Some(Message::Close(None)));
    viewer.task.await.unwrap();
    assert_eq!(hub.stats().await.unwrap().clients, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pong_extends_read_deadline() {
    let (_feed, hub, _cancel) = start_hub();
    let mut viewer = connect(&hub, SessionConfig::default());

    for _ in 0..3 {
        assert!(matches!(viewer.incoming.next().await, Some(Message::Ping(_))));
        viewer
            .outgoing
            .unbounded_send(Ok(Message::Pong(Default::default())))
            .unwrap();
    }

    assert!(!viewer.task.is_finished());
    assert_eq!(hub.stats().await.unwrap().clients, 1);
}
