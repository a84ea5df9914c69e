//! 수집 트랜잭션 코디네이터.
//!
//! `ingest` 호출 하나가 연결 하나를 획득해 auto-commit을 끄고, 배치의 모든 행과
//! 스트림 오프셋을 같은 트랜잭션으로 기록한 뒤 커밋합니다. 어떤 단계에서든
//! 실패하면 롤백하고 오류를 그대로 전파하므로, 커밋된 오프셋은 그 오프셋의
//! 배치에서 파생된 행과만 짝을 이룹니다.
//!
//! # 상태 전이
//!
//! `Idle → TransactionOpen → Writing* → OffsetWriting → Committed | RolledBack`
//!
//! # 동시성
//!
//! 코디네이터는 상호 배제를 제공하지 않습니다. 같은 스트림의 배치는 호출자가
//! 순서대로 하나씩 넘겨야 합니다 ([`crate::worker::StreamWorkers`] 참고).
//! 서로 다른 스트림의 호출은 별도 연결과 별도 오프셋 행을 사용하므로 독립적입니다.
//!
//! 호출 future가 중간에 drop되면 세션도 함께 drop되며, 열린 트랜잭션은
//! 커밋되지 않습니다.

use crate::error::Result;
use crate::offset::{to_db_offset, OffsetStore};
use crate::project::{project, IngestKeys};
use crate::record::Record;
use crate::stats::IngestStats;
use crate::store::{IngestStore, StoreSession};
use crate::validate::{validate, Validation};
use crate::writer::{BatchWriter, WriteSummary};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// 수집 트랜잭션 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Idle,
    TransactionOpen,
    Writing,
    OffsetWriting,
    Committed,
    RolledBack,
}

impl IngestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TransactionOpen => "transaction_open",
            Self::Writing => "writing",
            Self::OffsetWriting => "offset_writing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// 수집 트랜잭션 코디네이터.
pub struct IngestCoordinator<S: IngestStore> {
    store: Arc<S>,
    offsets: OffsetStore<S>,
    chunk_size: usize,
}

impl<S: IngestStore> IngestCoordinator<S> {
    pub fn new(store: Arc<S>, chunk_size: usize) -> Self {
        Self {
            offsets: OffsetStore::new(Arc::clone(&store)),
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn offsets(&self) -> &OffsetStore<S> {
        &self.offsets
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 스트림의 커밋된 오프셋 조회 (재개 위치 결정용).
    pub async fn get_offset(&self, stream: &str) -> Result<Option<u64>> {
        self.offsets.get(stream).await
    }

    /// 배치를 수집하고 기록된 행 수를 반환.
    ///
    /// 잘못된 레코드는 제외되며 반환 값에 포함되지 않습니다. 호가 스냅샷은
    /// 레벨 수만큼 행으로 계산됩니다. `u32` 범위를 넘는 행 수는 `u32::MAX`로
    /// 잘리며, 정확한 값은 [`Self::ingest_with_stats`]로 얻습니다.
    pub async fn ingest(&self, stream: &str, records: &[Record], target_offset: u64) -> Result<u32> {
        let stats = self.ingest_with_stats(stream, records, target_offset).await?;
        Ok(capped_row_count(stream, stats.rows_written))
    }

    /// 배치를 수집하고 상세 통계를 반환.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn ingest_with_stats(
        &self,
        stream: &str,
        records: &[Record],
        target_offset: u64,
    ) -> Result<IngestStats> {
        let start = Instant::now();
        // BIGINT 범위를 벗어난 오프셋은 연결 획득 전에 거부
        to_db_offset(target_offset)?;

        let mut phase = IngestPhase::Idle;
        let mut session = self.store.acquire().await?;
        let original_auto_commit = session.auto_commit();

        let result = match session.set_auto_commit(false).await {
            Ok(()) => {
                phase = IngestPhase::TransactionOpen;
                match self
                    .write_batch(&mut session, stream, records, target_offset, &mut phase)
                    .await
                {
                    Ok(stats) => session.commit().await.map(|()| stats),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        let result = match result {
            Ok(mut stats) => {
                phase = IngestPhase::Committed;
                stats.elapsed = start.elapsed();
                stats.log_summary(stream);
                Ok(stats)
            }
            Err(err) => {
                warn!(
                    stream = stream,
                    offset = target_offset,
                    phase = phase.as_str(),
                    error = %err,
                    "수집 실패, 트랜잭션 롤백"
                );
                if let Err(rollback_err) = session.rollback().await {
                    error!(stream = stream, error = %rollback_err, "롤백 실패");
                }
                phase = IngestPhase::RolledBack;
                Err(err)
            }
        };

        if let Err(e) = session.set_auto_commit(original_auto_commit).await {
            warn!(stream = stream, error = %e, "auto-commit 복원 실패");
        }
        debug!(stream = stream, phase = phase.as_str(), "세션 반환");

        result
    }

    async fn write_batch(
        &self,
        session: &mut S::Session,
        stream: &str,
        records: &[Record],
        target_offset: u64,
        phase: &mut IngestPhase,
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::new();
        stats.records = records.len();
        stats.offset = target_offset;

        let mut keys = IngestKeys::new(stream, target_offset);
        let mut writers: Vec<BatchWriter> = Vec::new();

        *phase = IngestPhase::Writing;
        for record in records {
            let valid = match validate(record) {
                Validation::Valid(valid) => valid,
                Validation::Malformed { kind, field } => {
                    stats.malformed += 1;
                    debug!(stream = stream, kind = %kind, field = field, "필수 필드 누락, 레코드 제외");
                    continue;
                }
            };

            let projection = project(valid, &mut keys);
            stats.skipped_levels += projection.skipped_levels;

            let table = &valid.schema().table;
            let idx = match writers.iter().position(|w| w.table().name == table.name) {
                Some(idx) => idx,
                None => {
                    writers.push(BatchWriter::new(table, self.chunk_size));
                    writers.len() - 1
                }
            };
            for row in projection.rows {
                writers[idx].push(session, row).await?;
            }
        }

        let mut total = WriteSummary::default();
        for writer in writers.iter_mut() {
            let summary = writer.finish(session).await?;
            stats
                .rows_by_table
                .insert(writer.table().name.to_string(), summary.rows_written);
            total += summary;
        }
        stats.rows_written = total.rows_written;
        stats.rows_affected = total.rows_affected;
        stats.flushes = total.flushes;

        *phase = IngestPhase::OffsetWriting;
        OffsetStore::<S>::upsert_in(session, stream, target_offset).await?;

        Ok(stats)
    }
}

fn capped_row_count(stream: &str, rows_written: u64) -> u32 {
    u32::try_from(rows_written).unwrap_or_else(|_| {
        warn!(
            stream = stream,
            rows_written = rows_written,
            "기록 행 수가 u32 범위 초과, u32::MAX로 반환"
        );
        u32::MAX
    })
}
