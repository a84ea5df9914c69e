//! 스트림 오프셋 저장소.
//!
//! 스트림 이름을 자연 키로 하는 단일 오프셋 값을 읽고 씁니다.
//! - 수집 트랜잭션 안에서: [`OffsetStore::upsert_in`] (같은 세션 사용)
//! - 단독으로: [`OffsetStore::get`] / [`OffsetStore::upsert`] (전송 계층 재개 시점 결정)

use crate::error::{IngestError, Result};
use crate::store::{IngestStore, StoreSession};
use std::sync::Arc;
use tracing::{debug, instrument};

/// 오프셋을 BIGINT 컬럼 값으로 변환.
pub fn to_db_offset(offset: u64) -> Result<i64> {
    i64::try_from(offset).map_err(|_| IngestError::InvalidOffset(offset))
}

fn from_db_offset(stream: &str, value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| {
        IngestError::Persistence(format!("negative offset {} stored for {}", value, stream))
    })
}

/// 오프셋 저장소.
pub struct OffsetStore<S: IngestStore> {
    store: Arc<S>,
}

impl<S: IngestStore> Clone for OffsetStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: IngestStore> OffsetStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 커밋된 오프셋 조회. 스트림 행이 없으면 `None`.
    #[instrument(skip(self))]
    pub async fn get(&self, stream: &str) -> Result<Option<u64>> {
        let mut session = self.store.acquire().await?;
        let value = session.read_offset(stream).await?;
        value.map(|v| from_db_offset(stream, v)).transpose()
    }

    /// 트랜잭션 밖에서 오프셋을 명시적으로 기록.
    #[instrument(skip(self))]
    pub async fn upsert(&self, stream: &str, offset: u64) -> Result<()> {
        let value = to_db_offset(offset)?;
        let mut session = self.store.acquire().await?;
        session.upsert_offset(stream, value).await?;

        debug!(stream = stream, offset = offset, "오프셋 기록");
        Ok(())
    }

    /// 호출자의 세션(트랜잭션)에서 오프셋 기록.
    pub async fn upsert_in<T>(session: &mut T, stream: &str, offset: u64) -> Result<()>
    where
        T: StoreSession + ?Sized,
    {
        let value = to_db_offset(offset)?;
        session.upsert_offset(stream, value).await
    }
}
