//! 저장소 경계.
//!
//! 수집 코어가 관계형 저장소에 요구하는 최소 연산을 trait으로 정의합니다.
//! - [`postgres::PgStore`]: sqlx 기반 PostgreSQL 구현
//! - [`memory::MemoryStore`]: 트랜잭션을 지원하는 인메모리 구현 (테스트, dry-run)

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::project::ProjectedRow;
use crate::schema::TableSchema;
use async_trait::async_trait;

pub use memory::{FlushRecord, MemoryStore, SessionRelease};
pub use postgres::{DatabaseConfig, PgStore};

/// 연결 풀 역할의 저장소.
#[async_trait]
pub trait IngestStore: Send + Sync {
    type Session: StoreSession;

    /// 연결 하나를 획득. 세션이 drop되면 풀로 반환됩니다.
    async fn acquire(&self) -> Result<Self::Session>;
}

/// 획득한 연결 하나.
///
/// auto-commit이 꺼진 상태에서 첫 구문이 실행되면 트랜잭션이 열리고,
/// `commit`/`rollback`으로 닫힙니다. 열린 트랜잭션을 가진 채 drop된 세션은
/// 커밋되지 않습니다.
#[async_trait]
pub trait StoreSession: Send {
    fn auto_commit(&self) -> bool;

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// 한 테이블에 여러 행을 한 구문으로 기록. 영향받은 행 수를 반환.
    async fn execute_batch(
        &mut self,
        table: &'static TableSchema,
        rows: &[ProjectedRow],
    ) -> Result<u64>;

    async fn upsert_offset(&mut self, stream: &str, offset: i64) -> Result<()>;

    async fn read_offset(&mut self, stream: &str) -> Result<Option<i64>>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
