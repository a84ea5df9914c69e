//! 수집 모듈 오류 타입.

use thiserror::Error;

/// 수집 관련 오류.
///
/// 잘못된 레코드(필수 필드 누락)와 필드 변환 실패는 오류가 아닙니다.
/// 각각 `Validation::Malformed`, `SqlValue::Null`로 표현되고 배치는 계속 진행됩니다.
#[derive(Debug, Error)]
pub enum IngestError {
    /// 저장소 오류 (연결, 구문, 제약 조건, 커밋)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// 연결 풀 소진 (획득 타임아웃)
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// BIGINT 범위를 벗어난 오프셋
    #[error("Invalid offset: {0} exceeds BIGINT range")]
    InvalidOffset(u64),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// 입력 파싱 오류
    #[error("Parse error: {0}")]
    ParseError(String),

    /// 이전 배치 실패로 정지된 스트림
    #[error("Stream halted: {0}")]
    StreamHalted(String),

    /// 스트림 워커가 종료됨
    #[error("Stream worker closed: {0}")]
    WorkerClosed(String),

    /// 파일 입출력 오류
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// 트랜잭션 롤백을 일으키는 저장소 계열 오류인지 확인.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::PoolExhausted)
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => IngestError::PoolExhausted,
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                IngestError::Persistence(format!("[{}] {}", code, db_err.message()))
            }
            _ => IngestError::Persistence(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::ParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
