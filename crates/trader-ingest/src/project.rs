//! 행 프로젝션.
//!
//! 검증된 레코드를 대상 테이블의 컬럼 순서에 맞는 위치 기반 튜플로 변환합니다.
//! 호가 스냅샷은 bid/ask 레벨마다 한 행으로 확장됩니다.

use crate::coerce::{coerce, ColumnType, SqlValue};
use crate::record::FieldValue;
use crate::schema::{ColumnSource, Expansion, TableSchema};
use crate::validate::ValidRecord;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::debug;

/// 대상 테이블 컬럼 순서와 일치하는 행.
pub type ProjectedRow = Vec<SqlValue>;

/// 호가 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Level {
    side: BookSide,
    price: rust_decimal::Decimal,
    size: rust_decimal::Decimal,
}

/// 프로젝션 결과.
#[derive(Debug, Default)]
pub struct Projection {
    pub rows: Vec<ProjectedRow>,
    /// 가격/수량 변환에 실패해 건너뛴 호가 레벨 수
    pub skipped_levels: usize,
}

/// 합성 멱등 키 생성기.
///
/// 키는 `stream / offset / table / 배치 내 테이블별 행 순번`의 SHA-256입니다.
/// 같은 배치를 같은 오프셋으로 다시 수집하면 같은 키가 만들어집니다.
#[derive(Debug)]
pub struct IngestKeys {
    stream: String,
    offset: u64,
    ordinals: HashMap<&'static str, u64>,
}

impl IngestKeys {
    pub fn new(stream: impl Into<String>, offset: u64) -> Self {
        Self {
            stream: stream.into(),
            offset,
            ordinals: HashMap::new(),
        }
    }

    /// 테이블의 다음 행 키.
    pub fn next_key(&mut self, table: &'static str) -> String {
        let ordinal = self.ordinals.entry(table).or_insert(0);
        let key = ingest_key(&self.stream, self.offset, table, *ordinal);
        *ordinal += 1;
        key
    }
}

/// 멱등 키 계산.
pub fn ingest_key(stream: &str, offset: u64, table: &str, ordinal: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stream.as_bytes());
    hasher.update([0x1f]);
    hasher.update(offset.to_be_bytes());
    hasher.update([0x1f]);
    hasher.update(table.as_bytes());
    hasher.update([0x1f]);
    hasher.update(ordinal.to_be_bytes());
    hex::encode(hasher.finalize())
}

/// 검증된 레코드를 행(들)로 변환.
pub fn project(valid: ValidRecord<'_>, keys: &mut IngestKeys) -> Projection {
    let schema = valid.schema();
    let table = &schema.table;

    match schema.expansion {
        Expansion::Single => Projection {
            rows: vec![build_row(table, valid, None, keys)],
            skipped_levels: 0,
        },
        Expansion::BookLevels { bids, asks } => {
            let mut projection = Projection::default();
            for (field, side) in [(bids, BookSide::Bid), (asks, BookSide::Ask)] {
                let entries = valid
                    .record()
                    .get(field)
                    .and_then(FieldValue::as_list)
                    .unwrap_or(&[]);

                for entry in entries {
                    match parse_level(entry, side) {
                        Some(level) => projection
                            .rows
                            .push(build_row(table, valid, Some(level), keys)),
                        None => {
                            projection.skipped_levels += 1;
                            debug!(table = table.name, side = side.as_str(), entry = ?entry, "호가 레벨 변환 실패, 건너뜀");
                        }
                    }
                }
            }
            projection
        }
    }
}

fn parse_level(entry: &FieldValue, side: BookSide) -> Option<Level> {
    let pair = entry.as_list()?;
    let price = coerce(pair.first(), ColumnType::Numeric).as_numeric()?;
    let size = coerce(pair.get(1), ColumnType::Numeric).as_numeric()?;
    Some(Level { side, price, size })
}

fn build_row(
    table: &'static TableSchema,
    valid: ValidRecord<'_>,
    level: Option<Level>,
    keys: &mut IngestKeys,
) -> ProjectedRow {
    table
        .columns
        .iter()
        .map(|column| match column.source {
            ColumnSource::Field(field) => coerce(valid.record().get(field), column.ty),
            ColumnSource::IngestKey => SqlValue::Text(keys.next_key(table.name)),
            ColumnSource::LevelSide => level
                .map(|l| SqlValue::Text(l.side.as_str().to_string()))
                .unwrap_or(SqlValue::Null(column.ty)),
            ColumnSource::LevelPrice => level
                .map(|l| SqlValue::Numeric(l.price))
                .unwrap_or(SqlValue::Null(column.ty)),
            ColumnSource::LevelSize => level
                .map(|l| SqlValue::Numeric(l.size))
                .unwrap_or(SqlValue::Null(column.ty)),
        })
        .collect()
}

// =============================================================================
// 테스트
// =============================================================================
