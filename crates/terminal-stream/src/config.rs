//! 환경변수 기반 설정 모듈.

use std::time::Duration;

use terminal_core::{LogConfig, PriceSource};
use terminal_data::{DatabaseConfig, RedisConfig};

use crate::error::{Result, StreamError};

/// 스트리밍 서비스 전체 설정
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// HTTP/WebSocket 서버 설정
    pub server: ServerConfig,
    /// OHLCV 저장소 설정
    pub store: StoreConfig,
    /// 업스트림 피드 전송 설정
    pub transport: TransportConfig,
    /// 마켓 채널 키 접두사 (예: "orderbook:")
    pub channel_prefix: String,
    /// Hub 설정
    pub hub: HubConfig,
    /// 클라이언트 세션 설정
    pub session: SessionConfig,
    /// 집계기 설정
    pub aggregator: AggregatorConfig,
    /// 로깅 설정
    pub logging: LogConfig,
}

/// 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 바인드 호스트
    pub host: String,
    /// 바인드 포트
    pub port: u16,
}

/// OHLCV 저장소 종류
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// PostgreSQL/TimescaleDB
    Timescale(DatabaseConfig),
    /// 프로세스 내 메모리
    Memory,
}

/// 피드 전송 종류
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Redis pub/sub
    Redis(RedisConfig),
    /// 프로세스 내 broadcast 채널
    Memory,
}

/// Hub 설정
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub 명령 수신함 크기
    pub command_capacity: usize,
}

/// 클라이언트 세션 설정
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 세션별 송신 큐 크기
    pub queue_capacity: usize,
    /// 수신 프레임 최대 크기 (바이트)
    pub max_message_size: usize,
    /// pong 대기 시간 (읽기 데드라인)
    pub pong_wait: Duration,
    /// 쓰기 한 번의 데드라인
    pub write_wait: Duration,
    /// 세션 하나가 동시에 구독할 수 있는 마켓 수
    pub max_subscriptions: usize,
}

/// OHLCV 집계기 설정
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// 만료 봉 스윕 주기
    pub sweep_interval: Duration,
    /// 스윕 타이머 지터 허용치
    pub sweep_tolerance: Duration,
    /// 호가에서 가격을 도출하는 방식
    pub price_source: PriceSource,
    /// 봉 확정 시 upsert 시도 횟수
    pub persist_attempts: u32,
    /// 첫 재시도 대기 시간 (시도마다 두 배)
    pub persist_backoff: Duration,
    /// 저장 대기 중인 확정 봉 큐 크기
    pub persist_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 4096,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_message_size: 512,
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            max_subscriptions: 64,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(15),
            sweep_tolerance: Duration::from_millis(1000),
            price_source: PriceSource::BestBid,
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(200),
            persist_queue_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// `host:port` 형식의 바인드 주소
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl SessionConfig {
    /// 쓰기 측 ping 주기 (pong 대기 시간의 9/10)
    pub fn ping_period(&self) -> Duration {
        self.pong_wait / 10 * 9
    }
}

impl StreamConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let store = match env_var_or("OHLCV_STORE", "timescale").as_str() {
            "memory" => StoreConfig::Memory,
            "timescale" => {
                let url = required_env("DATABASE_URL")?;
                let mut db = DatabaseConfig::new(url);
                db.max_connections = env_var_parse("DATABASE_MAX_CONNECTIONS", db.max_connections);
                StoreConfig::Timescale(db)
            }
            other => {
                return Err(StreamError::Config(format!(
                    "알 수 없는 OHLCV_STORE 값: {}",
                    other
                )))
            }
        };

        let transport = match env_var_or("FEED_TRANSPORT", "redis").as_str() {
            "memory" => TransportConfig::Memory,
            "redis" => TransportConfig::Redis(RedisConfig {
                url: required_env("REDIS_URL")?,
            }),
            other => {
                return Err(StreamError::Config(format!(
                    "알 수 없는 FEED_TRANSPORT 값: {}",
                    other
                )))
            }
        };

        let server_defaults = ServerConfig::default();
        let hub_defaults = HubConfig::default();
        let session_defaults = SessionConfig::default();
        let aggregator_defaults = AggregatorConfig::default();

        let config = Self {
            server: ServerConfig {
                host: env_var_or("STREAM_HOST", &server_defaults.host),
                port: env_var_parse("STREAM_PORT", server_defaults.port),
            },
            store,
            transport,
            channel_prefix: env_var_or("FEED_CHANNEL_PREFIX", "orderbook:"),
            hub: HubConfig {
                command_capacity: env_var_parse(
                    "HUB_COMMAND_CAPACITY",
                    hub_defaults.command_capacity,
                ),
            },
            session: SessionConfig {
                queue_capacity: env_var_parse(
                    "HUB_CLIENT_QUEUE_CAPACITY",
                    session_defaults.queue_capacity,
                ),
                max_message_size: env_var_parse(
                    "WS_MAX_MESSAGE_SIZE",
                    session_defaults.max_message_size,
                ),
                pong_wait: Duration::from_secs(env_var_parse(
                    "WS_PONG_WAIT_SECS",
                    session_defaults.pong_wait.as_secs(),
                )),
                write_wait: Duration::from_secs(env_var_parse(
                    "WS_WRITE_WAIT_SECS",
                    session_defaults.write_wait.as_secs(),
                )),
                max_subscriptions: env_var_parse(
                    "WS_MAX_SUBSCRIPTIONS",
                    session_defaults.max_subscriptions,
                ),
            },
            aggregator: AggregatorConfig {
                sweep_interval: Duration::from_secs(env_var_parse(
                    "AGGREGATOR_SWEEP_INTERVAL_SECS",
                    aggregator_defaults.sweep_interval.as_secs(),
                )),
                sweep_tolerance: Duration::from_millis(env_var_parse(
                    "AGGREGATOR_SWEEP_TOLERANCE_MS",
                    aggregator_defaults.sweep_tolerance.as_millis() as u64,
                )),
                price_source: env_var_parse(
                    "AGGREGATOR_PRICE_SOURCE",
                    aggregator_defaults.price_source,
                ),
                persist_attempts: env_var_parse(
                    "AGGREGATOR_PERSIST_ATTEMPTS",
                    aggregator_defaults.persist_attempts,
                ),
                persist_backoff: Duration::from_millis(env_var_parse(
                    "AGGREGATOR_PERSIST_BACKOFF_MS",
                    aggregator_defaults.persist_backoff.as_millis() as u64,
                )),
                persist_queue_capacity: env_var_parse(
                    "AGGREGATOR_PERSIST_QUEUE_CAPACITY",
                    aggregator_defaults.persist_queue_capacity,
                ),
            },
            logging: LogConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// 설정 값의 상호 제약을 검사합니다.
    pub fn validate(&self) -> Result<()> {
        if self.hub.command_capacity == 0 {
            return Err(StreamError::Config(
                "HUB_COMMAND_CAPACITY는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.channel_prefix.is_empty() {
            return Err(StreamError::Config(
                "FEED_CHANNEL_PREFIX가 비어 있습니다".to_string(),
            ));
        }
        self.session.validate()?;
        self.aggregator.validate()
    }
}

impl SessionConfig {
    /// 세션 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(StreamError::Config(
                "HUB_CLIENT_QUEUE_CAPACITY는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(StreamError::Config(
                "WS_MAX_MESSAGE_SIZE는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.max_subscriptions == 0 {
            return Err(StreamError::Config(
                "WS_MAX_SUBSCRIPTIONS는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.ping_period().is_zero() {
            return Err(StreamError::Config(
                "WS_PONG_WAIT_SECS는 0보다 커야 합니다".to_string(),
            ));
        }
        Ok(())
    }
}

impl AggregatorConfig {
    /// 집계기 설정 검증
    ///
    /// 스윕 주기는 가장 작은 해상도(1분)보다 짧아야 합니다.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() || self.sweep_interval >= Duration::from_secs(60) {
            return Err(StreamError::Config(format!(
                "AGGREGATOR_SWEEP_INTERVAL_SECS는 1~59초여야 합니다: {:?}",
                self.sweep_interval
            )));
        }
        if self.persist_attempts == 0 {
            return Err(StreamError::Config(
                "AGGREGATOR_PERSIST_ATTEMPTS는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.persist_queue_capacity == 0 {
            return Err(StreamError::Config(
                "AGGREGATOR_PERSIST_QUEUE_CAPACITY는 0보다 커야 합니다".to_string(),
            ));
        }
        Ok(())
    }
}

/// 필수 환경변수 조회
fn required_env(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| StreamError::Config(format!("{} 환경변수가 설정되지 않았습니다", key)))
}

/// 환경변수 문자열 (없으면 기본값)
fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
