//! 시장 데이터 수집 코어.
//!
//! 이 crate는 디코딩된 시장 데이터 레코드 배치(캔들, 티커, 체결, 호가, 청산,
//! 심리 지수, 지표)를 관계형 저장소에 기록하면서, 스트림별 오프셋을 같은
//! 트랜잭션으로 전진시킵니다:
//! - 필드 변환과 필수 필드 검증 (잘못된 레코드는 배치를 실패시키지 않음)
//! - 선언형 프로젝션 스키마 기반 행 변환
//! - 테이블별 청크 단위 배치 기록과 충돌 정책
//! - 배치와 오프셋의 원자적 커밋
//! - 스트림별 직렬 워커

pub mod coerce;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod offset;
pub mod project;
pub mod record;
pub mod schema;
pub mod stats;
pub mod store;
pub mod validate;
pub mod worker;
pub mod writer;

pub use config::IngestConfig;
pub use coordinator::{IngestCoordinator, IngestPhase};
pub use error::{IngestError, Result};
pub use offset::OffsetStore;
pub use record::{FieldValue, Record, RecordKind};
pub use stats::IngestStats;
pub use store::{DatabaseConfig, IngestStore, MemoryStore, PgStore, StoreSession};
pub use worker::{IngestTicket, StreamWorkers};
