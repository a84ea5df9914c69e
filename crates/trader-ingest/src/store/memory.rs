//! 인메모리 저장소 구현.
//!
//! PostgreSQL 구현과 같은 트랜잭션 의미를 프로세스 안에서 제공합니다.
//! - auto-commit이 꺼진 세션의 쓰기는 커밋 전까지 다른 세션에 보이지 않음
//! - 충돌 정책은 테이블 선언의 키로 판정
//! - `UpdateOnConflict` 구문 하나가 같은 키를 두 번 담으면 PostgreSQL처럼 실패
//! - 플러시 기록, 세션 반환 기록, 장애 주입 지원

use super::{IngestStore, StoreSession};
use crate::error::{IngestError, Result};
use crate::project::ProjectedRow;
use crate::schema::{ConflictPolicy, TableSchema};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// 실행된 배치 구문 하나.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRecord {
    pub table: &'static str,
    pub rows: usize,
}

/// 세션이 반환될 때의 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRelease {
    pub auto_commit: bool,
    pub open_transaction: bool,
}

#[derive(Debug, Default)]
struct Faults {
    table: Option<String>,
    offset: bool,
    commit: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<&'static str, Vec<ProjectedRow>>,
    offsets: HashMap<String, i64>,
    flushes: Vec<FlushRecord>,
    releases: Vec<SessionRelease>,
    faults: Faults,
}

/// 인메모리 저장소.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }

    /// 커밋된 행.
    pub fn rows(&self, table: &str) -> Vec<ProjectedRow> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map(Vec::len).unwrap_or(0)
    }

    /// 커밋 여부와 관계없이 실행된 모든 배치 구문.
    pub fn flushes(&self) -> Vec<FlushRecord> {
        self.lock().flushes.clone()
    }

    /// 반환된 세션들의 상태.
    pub fn releases(&self) -> Vec<SessionRelease> {
        self.lock().releases.clone()
    }

    /// 지정 테이블에 대한 배치 구문이 실패하도록 설정.
    pub fn fail_writes_to(&self, table: &str) {
        self.lock().faults.table = Some(table.to_string());
    }

    /// 오프셋 upsert가 실패하도록 설정.
    pub fn fail_offset_writes(&self) {
        self.lock().faults.offset = true;
    }

    /// 커밋이 실패하도록 설정.
    pub fn fail_commits(&self) {
        self.lock().faults.commit = true;
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl IngestStore for MemoryStore {
    type Session = MemorySession;

    async fn acquire(&self) -> Result<MemorySession> {
        Ok(MemorySession {
            state: Arc::clone(&self.state),
            auto_commit: true,
            tx: None,
        })
    }
}

#[derive(Debug)]
enum PendingOp {
    Rows {
        table: &'static TableSchema,
        rows: Vec<ProjectedRow>,
    },
    Offset {
        stream: String,
        offset: i64,
    },
}

/// 인메모리 세션.
#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    auto_commit: bool,
    /// 커밋 대기 중인 쓰기 (트랜잭션이 열려 있으면 `Some`)
    tx: Option<Vec<PendingOp>>,
}

impl MemorySession {
    fn pending(&mut self) -> Option<&mut Vec<PendingOp>> {
        if self.auto_commit {
            None
        } else {
            Some(self.tx.get_or_insert_with(Vec::new))
        }
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.tx = None;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    async fn execute_batch(
        &mut self,
        table: &'static TableSchema,
        rows: &[ProjectedRow],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let state = Arc::clone(&self.state);
        let mut guard = lock_state(&state);
        guard.flushes.push(FlushRecord {
            table: table.name,
            rows: rows.len(),
        });
        if guard.faults.table.as_deref() == Some(table.name) {
            return Err(IngestError::Persistence(format!(
                "injected write failure on {}",
                table.name
            )));
        }
        if has_duplicate_update_keys(table, rows) {
            return Err(IngestError::Persistence(
                "[21000] ON CONFLICT DO UPDATE command cannot affect row a second time"
                    .to_string(),
            ));
        }

        match self.pending() {
            None => {
                let existing = guard.tables.entry(table.name).or_default();
                Ok(apply_rows(existing, table, rows))
            }
            Some(pending) => {
                // 커밋된 상태 + 대기 중인 쓰기 위에서 영향 행 수를 계산
                let mut view = guard.tables.get(table.name).cloned().unwrap_or_default();
                for op in pending.iter() {
                    if let PendingOp::Rows { table: t, rows } = op {
                        if t.name == table.name {
                            apply_rows(&mut view, table, rows);
                        }
                    }
                }
                let affected = apply_rows(&mut view, table, rows);
                pending.push(PendingOp::Rows {
                    table,
                    rows: rows.to_vec(),
                });
                Ok(affected)
            }
        }
    }

    async fn upsert_offset(&mut self, stream: &str, offset: i64) -> Result<()> {
        let state = Arc::clone(&self.state);
        let mut guard = lock_state(&state);
        if guard.faults.offset {
            return Err(IngestError::Persistence(
                "injected offset write failure".to_string(),
            ));
        }

        match self.pending() {
            None => {
                guard.offsets.insert(stream.to_string(), offset);
            }
            Some(pending) => pending.push(PendingOp::Offset {
                stream: stream.to_string(),
                offset,
            }),
        }
        Ok(())
    }

    async fn read_offset(&mut self, stream: &str) -> Result<Option<i64>> {
        let staged = self.tx.as_ref().and_then(|ops| {
            ops.iter().rev().find_map(|op| match op {
                PendingOp::Offset { stream: s, offset } if s == stream => Some(*offset),
                _ => None,
            })
        });
        if staged.is_some() {
            return Ok(staged);
        }
        Ok(lock_state(&self.state).offsets.get(stream).copied())
    }

    async fn commit(&mut self) -> Result<()> {
        let state = Arc::clone(&self.state);
        let mut guard = lock_state(&state);
        if guard.faults.commit && self.tx.is_some() {
            return Err(IngestError::Persistence("injected commit failure".to_string()));
        }

        for op in self.tx.take().unwrap_or_default() {
            match op {
                PendingOp::Rows { table, rows } => {
                    let existing = guard.tables.entry(table.name).or_default();
                    apply_rows(existing, table, &rows);
                }
                PendingOp::Offset { stream, offset } => {
                    guard.offsets.insert(stream, offset);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let release = SessionRelease {
            auto_commit: self.auto_commit,
            open_transaction: self.tx.is_some(),
        };
        lock_state(&self.state).releases.push(release);
    }
}

fn has_duplicate_update_keys(table: &TableSchema, rows: &[ProjectedRow]) -> bool {
    if table.conflict != ConflictPolicy::UpdateOnConflict {
        return false;
    }
    let key = table.key_indices();
    let mut seen = HashSet::with_capacity(rows.len());
    rows.iter()
        .any(|row| !seen.insert(key.iter().map(|&i| row.get(i)).collect::<Vec<_>>()))
}

/// 충돌 정책을 적용해 행을 반영하고 영향받은 행 수를 반환.
fn apply_rows(existing: &mut Vec<ProjectedRow>, table: &TableSchema, rows: &[ProjectedRow]) -> u64 {
    let key = table.key_indices();
    let mut affected = 0;

    for row in rows {
        let found = existing
            .iter()
            .position(|e| key.iter().all(|&i| e.get(i) == row.get(i)));
        match (found, table.conflict) {
            (None, _) => {
                existing.push(row.clone());
                affected += 1;
            }
            (Some(_), ConflictPolicy::IgnoreOnConflict) => {}
            (Some(idx), ConflictPolicy::UpdateOnConflict) => {
                existing[idx] = row.clone();
                affected += 1;
            }
        }
    }
    affected
}
