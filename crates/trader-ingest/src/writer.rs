//! 배치 기록기.
//!
//! 프로젝션된 행을 모았다가 `chunk_size`개가 쌓일 때마다 한 구문으로 플러시하고,
//! 배치 끝에서 나머지를 한 번 더 플러시합니다. 커밋은 하지 않습니다.
//! 청크는 처리량과 메모리 제어용일 뿐 모든 플러시는 호출자의 트랜잭션 안에 있습니다.
//!
//! `UpdateOnConflict` 테이블은 플러시 직전에 같은 키를 가진 행을 마지막 행 하나로
//! 합칩니다. 한 `INSERT … ON CONFLICT DO UPDATE` 구문은 같은 행을 두 번 갱신할 수
//! 없으며, 마지막 행만 남기면 순서대로 갱신한 결과와 같습니다.

use crate::coerce::SqlValue;
use crate::error::Result;
use crate::project::ProjectedRow;
use crate::schema::{ConflictPolicy, TableSchema};
use crate::store::StoreSession;
use std::collections::HashSet;
use tracing::debug;

/// 기록 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// 구문에 전달된 행 수
    pub rows_written: u64,
    /// 저장소가 보고한 영향 행 수 (충돌로 무시된 행 제외)
    pub rows_affected: u64,
    /// 실행된 구문 수
    pub flushes: usize,
}

impl std::ops::AddAssign for WriteSummary {
    fn add_assign(&mut self, other: Self) {
        self.rows_written += other.rows_written;
        self.rows_affected += other.rows_affected;
        self.flushes += other.flushes;
    }
}

/// 테이블 하나에 대한 청크 단위 기록기.
#[derive(Debug)]
pub struct BatchWriter {
    table: &'static TableSchema,
    chunk_size: usize,
    buffer: Vec<ProjectedRow>,
    summary: WriteSummary,
}

impl BatchWriter {
    pub fn new(table: &'static TableSchema, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            table,
            chunk_size,
            buffer: Vec::with_capacity(chunk_size),
            summary: WriteSummary::default(),
        }
    }

    pub fn table(&self) -> &'static TableSchema {
        self.table
    }

    pub fn summary(&self) -> WriteSummary {
        self.summary
    }

    /// 행 추가. 버퍼가 가득 차면 플러시.
    pub async fn push<S>(&mut self, session: &mut S, row: ProjectedRow) -> Result<()>
    where
        S: StoreSession + ?Sized,
    {
        self.buffer.push(row);
        if self.buffer.len() >= self.chunk_size {
            self.flush(session).await?;
        }
        Ok(())
    }

    /// 남은 행을 플러시하고 누적 결과를 반환.
    pub async fn finish<S>(&mut self, session: &mut S) -> Result<WriteSummary>
    where
        S: StoreSession + ?Sized,
    {
        self.flush(session).await?;
        Ok(self.summary)
    }

    async fn flush<S>(&mut self, session: &mut S) -> Result<()>
    where
        S: StoreSession + ?Sized,
    {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let handed = self.buffer.len();
        let collapsed = collapse_duplicate_keys(self.table, &mut self.buffer);
        let affected = session.execute_batch(self.table, &self.buffer).await?;
        self.summary.rows_written += handed as u64;
        self.summary.rows_affected += affected;
        self.summary.flushes += 1;

        debug!(
            table = self.table.name,
            rows = self.buffer.len(),
            collapsed = collapsed,
            affected = affected,
            "청크 플러시"
        );
        self.buffer.clear();
        Ok(())
    }
}

/// `UpdateOnConflict` 테이블에서 키가 같은 행을 마지막 행만 남기고 제거.
///
/// 제거된 행 수를 반환합니다. 다른 충돌 정책에서는 아무것도 하지 않습니다.
pub fn collapse_duplicate_keys(table: &TableSchema, rows: &mut Vec<ProjectedRow>) -> usize {
    if table.conflict != ConflictPolicy::UpdateOnConflict || rows.len() < 2 {
        return 0;
    }

    let key = table.key_indices();
    let mut keep = vec![false; rows.len()];
    let mut seen: HashSet<Vec<Option<&SqlValue>>> = HashSet::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate().rev() {
        keep[i] = seen.insert(key.iter().map(|&c| row.get(c)).collect());
    }

    let before = rows.len();
    let mut flags = keep.into_iter();
    rows.retain(|_| flags.next().unwrap_or(true));
    before - rows.len()
}

/// 행 전체를 청크 단위로 기록.
pub async fn write_rows<S>(
    session: &mut S,
    table: &'static TableSchema,
    rows: Vec<ProjectedRow>,
    chunk_size: usize,
) -> Result<WriteSummary>
where
    S: StoreSession + ?Sized,
{
    let mut writer = BatchWriter::new(table, chunk_size);
    for row in rows {
        writer.push(session, row).await?;
    }
    writer.finish(session).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::SqlValue;
    use crate::record::RecordKind;
    use crate::schema::schema_for;
    use crate::store::{FlushRecord, IngestStore, MemoryStore};
    use proptest::prelude::*;

    fn rows(n: usize) -> Vec<ProjectedRow> {
        (0..n)
            .map(|i| {
                vec![
                    SqlValue::BigInt(i as i64),
                    SqlValue::Numeric(i.into()),
                    SqlValue::Text("Fear".into()),
                ]
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chunked_flush_sizes() {
        let store = MemoryStore::new();
        let table = &schema_for(RecordKind::SentimentIndex).table;
        let mut session = store.acquire().await.unwrap();

        let summary = write_rows(&mut session, table, rows(3 * 4 + 1), 4)
            .await
            .unwrap();

        let sizes: Vec<usize> = store.flushes().iter().map(|f| f.rows).collect();
        assert_eq!(sizes, vec![4, 4, 4, 1]);
        assert_eq!(summary.rows_written, 13);
        assert_eq!(summary.rows_affected, 13);
        assert_eq!(summary.flushes, 4);
        assert_eq!(store.row_count("sentiment_index"), 13);
    }

    #[tokio::test]
    async fn test_empty_input_never_flushes() {
        let store = MemoryStore::new();
        let table = &schema_for(RecordKind::Kline).table;
        let mut session = store.acquire().await.unwrap();

        let summary = write_rows(&mut session, table, Vec::new(), 10).await.unwrap();

        assert_eq!(summary, WriteSummary::default());
        assert!(store.flushes().is_empty());
    }

    #[tokio::test]
    async fn test_exact_multiple_has_no_remainder_flush() {
        let store = MemoryStore::new();
        let table = &schema_for(RecordKind::SentimentIndex).table;
        let mut session = store.acquire().await.unwrap();

        write_rows(&mut session, table, rows(6), 3).await.unwrap();

        assert_eq!(
            store.flushes(),
            vec![
                FlushRecord { table: "sentiment_index", rows: 3 },
                FlushRecord { table: "sentiment_index", rows: 3 },
            ]
        );
    }

    fn indicator_row(ts: i64, close: i64) -> ProjectedRow {
        let table = &schema_for(RecordKind::Indicator).table;
        let mut row: ProjectedRow = table.columns.iter().map(|c| SqlValue::Null(c.ty)).collect();
        row[table.column_index("symbol").unwrap()] = SqlValue::Text("BTCUSD".into());
        row[table.column_index("ts").unwrap()] =
            SqlValue::Timestamp(chrono::DateTime::from_timestamp_millis(ts).unwrap());
        row[table.column_index("close_price").unwrap()] = SqlValue::Numeric(close.into());
        row
    }

    #[test]
    fn test_collapse_keeps_last_row_per_key() {
        let table = &schema_for(RecordKind::Indicator).table;
        let close = table.column_index("close_price").unwrap();
        let mut batch = vec![
            indicator_row(1, 100),
            indicator_row(2, 200),
            indicator_row(1, 101),
            indicator_row(1, 102),
        ];

        let removed = collapse_duplicate_keys(table, &mut batch);

        assert_eq!(removed, 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0][close], SqlValue::Numeric(200.into()));
        assert_eq!(batch[1][close], SqlValue::Numeric(102.into()));
    }

    #[test]
    fn test_collapse_ignores_insert_only_tables() {
        let table = &schema_for(RecordKind::SentimentIndex).table;
        let mut batch = rows(3);
        batch.push(batch[0].clone());

        assert_eq!(collapse_duplicate_keys(table, &mut batch), 0);
        assert_eq!(batch.len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_updates_in_one_chunk_flush_once() {
        let store = MemoryStore::new();
        let table = &schema_for(RecordKind::Indicator).table;
        let mut session = store.acquire().await.unwrap();

        let summary = write_rows(
            &mut session,
            table,
            vec![indicator_row(1, 100), indicator_row(1, 101)],
            10,
        )
        .await
        .unwrap();

        assert_eq!(summary.rows_written, 2);
        assert_eq!(store.flushes(), vec![FlushRecord { table: "indicator", rows: 1 }]);
        let stored = store.rows("indicator");
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0][table.column_index("close_price").unwrap()],
            SqlValue::Numeric(101.into())
        );
    }

    proptest! {
        #[test]
        fn prop_flush_sizes_are_full_chunks_plus_remainder(n in 0usize..200, chunk in 1usize..40) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = MemoryStore::new();
            let table = &schema_for(RecordKind::SentimentIndex).table;

            runtime.block_on(async {
                let mut session = store.acquire().await.unwrap();
                write_rows(&mut session, table, rows(n), chunk).await.unwrap();
            });

            let sizes: Vec<usize> = store.flushes().iter().map(|f| f.rows).collect();
            prop_assert_eq!(sizes.iter().sum::<usize>(), n);
            prop_assert_eq!(sizes.len(), n.div_ceil(chunk));
            if let Some((last, full)) = sizes.split_last() {
                prop_assert!(full.iter().all(|&s| s == chunk));
                prop_assert!(*last >= 1 && *last <= chunk);
            }
        }
    }
}
