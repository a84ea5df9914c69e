//! 환경변수 기반 설정 모듈.

use crate::error::{IngestError, Result};
use crate::schema::max_column_count;
use crate::store::postgres::{
    default_acquire_timeout, default_idle_timeout, default_max_connections,
    default_min_connections, default_statement_timeout,
};
use crate::store::DatabaseConfig;

/// PostgreSQL 한 구문의 바인딩 파라미터 한도
const MAX_BIND_PARAMS: usize = 65_535;

/// 수집기 전체 설정
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// 데이터베이스 설정 (`url`이 비어 있으면 미설정)
    pub database: DatabaseConfig,
    /// 테이블별 플러시 단위 (행 수)
    pub chunk_size: usize,
    /// 스트림 워커당 대기 큐 크기
    pub worker_queue: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            chunk_size: 500,
            worker_queue: 64,
        }
    }
}

impl IngestConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").unwrap_or_default(),
                max_connections: env_var_parse("DB_MAX_CONNECTIONS", default_max_connections()),
                min_connections: env_var_parse("DB_MIN_CONNECTIONS", default_min_connections()),
                acquire_timeout_secs: env_var_parse(
                    "DB_ACQUIRE_TIMEOUT_SECS",
                    default_acquire_timeout(),
                ),
                idle_timeout_secs: env_var_parse("DB_IDLE_TIMEOUT_SECS", default_idle_timeout()),
                statement_timeout_ms: env_var_parse(
                    "DB_STATEMENT_TIMEOUT_MS",
                    default_statement_timeout(),
                ),
            },
            chunk_size: env_var_parse("INGEST_CHUNK_SIZE", 500),
            worker_queue: env_var_parse("INGEST_WORKER_QUEUE", 64),
        };
        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(IngestError::ConfigError(
                "INGEST_CHUNK_SIZE는 1 이상이어야 합니다".to_string(),
            ));
        }

        let max_chunk = MAX_BIND_PARAMS / max_column_count();
        if self.chunk_size > max_chunk {
            return Err(IngestError::ConfigError(format!(
                "INGEST_CHUNK_SIZE {}는 바인딩 파라미터 한도를 넘습니다 (최대 {})",
                self.chunk_size, max_chunk
            )));
        }

        if self.worker_queue == 0 {
            return Err(IngestError::ConfigError(
                "INGEST_WORKER_QUEUE는 1 이상이어야 합니다".to_string(),
            ));
        }
        Ok(())
    }

    /// 데이터베이스 설정 반환 (URL 미설정 시 오류)
    pub fn require_database(&self) -> Result<&DatabaseConfig> {
        if self.database.url.trim().is_empty() {
            return Err(IngestError::ConfigError(
                "DATABASE_URL 환경변수가 설정되지 않았습니다".to_string(),
            ));
        }
        Ok(&self.database)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
