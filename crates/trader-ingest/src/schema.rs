//! 프로젝션 스키마.
//!
//! 레코드 종류 → 대상 테이블 → 컬럼 목록 → 충돌 정책 → 다중 행 확장 규칙을
//! 하나의 정적 테이블로 선언합니다. 종류별 저장소 구현 없이 하나의 범용
//! 엔진이 이 선언을 해석합니다.

use crate::coerce::ColumnType;
use crate::record::RecordKind;

use ColumnType::{BigInt, Boolean, Numeric, Text, Timestamp};

/// 오프셋 테이블 이름.
pub const OFFSET_TABLE: &str = "ingest_offset";

/// 자연 키가 이미 존재할 때의 처리 규칙.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// 중복 키는 무시 (`ON CONFLICT DO NOTHING`)
    IgnoreOnConflict,
    /// 키가 아닌 모든 컬럼을 덮어쓰고 갱신 시각을 새로 기록
    UpdateOnConflict,
}

/// 컬럼 값의 출처.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnSource {
    /// 레코드 필드
    Field(&'static str),
    /// 호가 레벨의 방향 (`bid` / `ask`)
    LevelSide,
    /// 호가 레벨의 가격
    LevelPrice,
    /// 호가 레벨의 수량
    LevelSize,
    /// 스트림/오프셋/행 순번으로 만든 합성 멱등 키
    IngestKey,
}

/// 테이블 컬럼 선언.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub source: ColumnSource,
    pub required: bool,
}

const fn col(name: &'static str, ty: ColumnType, field: &'static str, required: bool) -> Column {
    Column {
        name,
        ty,
        source: ColumnSource::Field(field),
        required,
    }
}

const fn derived(name: &'static str, ty: ColumnType, source: ColumnSource) -> Column {
    Column {
        name,
        ty,
        source,
        required: true,
    }
}

/// 대상 테이블 선언.
#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
    /// 충돌 판정 키 (유니크 제약 컬럼)
    pub key: &'static [&'static str],
    pub conflict: ConflictPolicy,
    /// UPDATE 충돌 시 `NOW()`로 갱신되는 컬럼
    pub touch_column: Option<&'static str>,
}

/// 다중 행 확장 규칙.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// 레코드 하나 → 행 하나
    Single,
    /// 호가 스냅샷 → 레벨당 행 하나
    BookLevels {
        bids: &'static str,
        asks: &'static str,
    },
}

/// 레코드 종류별 프로젝션 스키마.
#[derive(Debug)]
pub struct ProjectionSchema {
    pub kind: RecordKind,
    pub table: TableSchema,
    pub expansion: Expansion,
}

impl ProjectionSchema {
    /// 레코드 단위 필수 필드 (레벨 컬럼 제외).
    pub fn required_fields(&self) -> impl Iterator<Item = (&'static str, ColumnType)> + '_ {
        self.table.columns.iter().filter_map(|c| match c.source {
            ColumnSource::Field(field) if c.required => Some((field, c.ty)),
            _ => None,
        })
    }
}

static KLINE: ProjectionSchema = ProjectionSchema {
    kind: RecordKind::Kline,
    table: TableSchema {
        name: "kline",
        columns: &[
            col("symbol", Text, "symbol", true),
            col("start_time", Timestamp, "start", true),
            col("end_time", Timestamp, "end", true),
            col("open", Numeric, "open", true),
            col("close", Numeric, "close", true),
            col("high", Numeric, "high", true),
            col("low", Numeric, "low", true),
            col("volume", Numeric, "volume", true),
            col("turnover", Numeric, "turnover", true),
        ],
        key: &["symbol", "start_time"],
        conflict: ConflictPolicy::IgnoreOnConflict,
        touch_column: None,
    },
    expansion: Expansion::Single,
};

static TICKER: ProjectionSchema = ProjectionSchema {
    kind: RecordKind::Ticker,
    table: TableSchema {
        name: "ticker",
        columns: &[
            col("symbol", Text, "symbol", true),
            col("ts", Timestamp, "timestamp", true),
            col("last_price", Numeric, "lastPrice", true),
            col("high_price_24h", Numeric, "highPrice24h", false),
            col("low_price_24h", Numeric, "lowPrice24h", false),
            col("prev_price_24h", Numeric, "prevPrice24h", false),
            col("volume_24h", Numeric, "volume24h", false),
            col("turnover_24h", Numeric, "turnover24h", false),
            col("price_24h_pcnt", Numeric, "price24hPcnt", false),
            col("bid1_price", Numeric, "bid1Price", false),
            col("bid1_size", Numeric, "bid1Size", false),
            col("ask1_price", Numeric, "ask1Price", false),
            col("ask1_size", Numeric, "ask1Size", false),
            // 파생상품 거래소 확장 필드
            col("mark_price", Numeric, "markPrice", false),
            col("index_price", Numeric, "indexPrice", false),
            col("open_interest", Numeric, "openInterest", false),
            col("funding_rate", Numeric, "fundingRate", false),
            col("next_funding_time", Timestamp, "nextFundingTime", false),
        ],
        key: &["symbol", "ts"],
        conflict: ConflictPolicy::IgnoreOnConflict,
        touch_column: None,
    },
    expansion: Expansion::Single,
};

static PUBLIC_TRADE: ProjectionSchema = ProjectionSchema {
    kind: RecordKind::PublicTrade,
    table: TableSchema {
        name: "public_trade",
        columns: &[
            derived("ingest_key", Text, ColumnSource::IngestKey),
            col("symbol", Text, "symbol", true),
            col("trade_time", Timestamp, "tradeTime", true),
            col("trade_id", Text, "tradeId", false),
            col("side", Text, "side", true),
            col("price", Numeric, "price", true),
            col("size", Numeric, "size", true),
            col("is_block_trade", Boolean, "isBlockTrade", false),
        ],
        key: &["ingest_key"],
        conflict: ConflictPolicy::IgnoreOnConflict,
        touch_column: None,
    },
    expansion: Expansion::Single,
};

static ORDER_BOOK: ProjectionSchema = ProjectionSchema {
    kind: RecordKind::OrderBook,
    table: TableSchema {
        name: "order_book_level",
        columns: &[
            derived("ingest_key", Text, ColumnSource::IngestKey),
            col("symbol", Text, "symbol", true),
            col("engine_time", Timestamp, "engineTime", true),
            col("update_id", BigInt, "updateId", false),
            derived("side", Text, ColumnSource::LevelSide),
            derived("price", Numeric, ColumnSource::LevelPrice),
            derived("size", Numeric, ColumnSource::LevelSize),
        ],
        key: &["ingest_key"],
        conflict: ConflictPolicy::IgnoreOnConflict,
        touch_column: None,
    },
    expansion: Expansion::BookLevels {
        bids: "bids",
        asks: "asks",
    },
};

static LIQUIDATION: ProjectionSchema = ProjectionSchema {
    kind: RecordKind::Liquidation,
    table: TableSchema {
        name: "liquidation",
        columns: &[
            derived("ingest_key", Text, ColumnSource::IngestKey),
            col("symbol", Text, "symbol", true),
            col("event_time", Timestamp, "eventTime", true),
            col("side", Text, "side", true),
            col("size", Numeric, "size", true),
            col("price", Numeric, "price", true),
        ],
        key: &["ingest_key"],
        conflict: ConflictPolicy::IgnoreOnConflict,
        touch_column: None,
    },
    expansion: Expansion::Single,
};

static SENTIMENT_INDEX: ProjectionSchema = ProjectionSchema {
    kind: RecordKind::SentimentIndex,
    table: TableSchema {
        name: "sentiment_index",
        columns: &[
            col("update_time", Timestamp, "updateTime", true),
            col("value", Numeric, "value", true),
            col("classification", Text, "classification", true),
        ],
        key: &["update_time"],
        conflict: ConflictPolicy::IgnoreOnConflict,
        touch_column: None,
    },
    expansion: Expansion::Single,
};

static INDICATOR: ProjectionSchema = ProjectionSchema {
    kind: RecordKind::Indicator,
    table: TableSchema {
        name: "indicator",
        columns: &[
            col("symbol", Text, "symbol", true),
            col("ts", Timestamp, "timestamp", true),
            col("close_price", Numeric, "closePrice", true),
            col("sma_20", Numeric, "sma20", false),
            col("sma_50", Numeric, "sma50", false),
            col("sma_200", Numeric, "sma200", false),
            col("ema_12", Numeric, "ema12", false),
            col("ema_26", Numeric, "ema26", false),
        ],
        key: &["symbol", "ts"],
        conflict: ConflictPolicy::UpdateOnConflict,
        touch_column: Some("updated_at"),
    },
    expansion: Expansion::Single,
};

/// 레코드 종류에 해당하는 프로젝션 스키마.
pub fn schema_for(kind: RecordKind) -> &'static ProjectionSchema {
    match kind {
        RecordKind::Kline => &KLINE,
        RecordKind::Ticker => &TICKER,
        RecordKind::PublicTrade => &PUBLIC_TRADE,
        RecordKind::OrderBook => &ORDER_BOOK,
        RecordKind::Liquidation => &LIQUIDATION,
        RecordKind::SentimentIndex => &SENTIMENT_INDEX,
        RecordKind::Indicator => &INDICATOR,
    }
}

/// 모든 프로젝션 스키마.
pub fn all_schemas() -> impl Iterator<Item = &'static ProjectionSchema> {
    RecordKind::ALL.into_iter().map(schema_for)
}

/// 가장 넓은 테이블의 컬럼 수 (청크당 바인딩 파라미터 한도 계산용).
pub fn max_column_count() -> usize {
    all_schemas()
        .map(|s| s.table.columns.len())
        .max()
        .unwrap_or(1)
}

impl TableSchema {
    /// 컬럼 이름으로 위치 조회.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// 충돌 키 컬럼들의 위치.
    pub fn key_indices(&self) -> Vec<usize> {
        self.key
            .iter()
            .filter_map(|k| self.column_index(k))
            .collect()
    }

    /// `INSERT INTO t (c1, c2, ...) ` 접두부.
    pub fn insert_prefix(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        format!("INSERT INTO {} ({}) ", self.name, names.join(", "))
    }

    /// 충돌 정책에 따른 `ON CONFLICT` 절.
    pub fn conflict_clause(&self) -> String {
        let key = self.key.join(", ");
        match self.conflict {
            ConflictPolicy::IgnoreOnConflict => format!(" ON CONFLICT ({}) DO NOTHING", key),
            ConflictPolicy::UpdateOnConflict => {
                let mut sets: Vec<String> = self
                    .columns
                    .iter()
                    .filter(|c| !self.key.contains(&c.name))
                    .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
                    .collect();
                if let Some(touch) = self.touch_column {
                    sets.push(format!("{} = NOW()", touch));
                }
                format!(" ON CONFLICT ({}) DO UPDATE SET {}", key, sets.join(", "))
            }
        }
    }

    /// 참고용 DDL.
    pub fn create_table_sql(&self) -> String {
        let mut lines: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let null = if c.required { " NOT NULL" } else { "" };
                format!("    {} {}{}", c.name, c.ty.sql_name(), null)
            })
            .collect();
        if let Some(touch) = self.touch_column {
            lines.push(format!("    {} TIMESTAMPTZ NOT NULL DEFAULT NOW()", touch));
        }
        lines.push(format!("    UNIQUE ({})", self.key.join(", ")));
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            self.name,
            lines.join(",\n")
        )
    }
}

/// 오프셋 테이블 DDL.
pub fn offset_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    stream_name TEXT PRIMARY KEY,\n    \"offset\" BIGINT NOT NULL,\n    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n);",
        OFFSET_TABLE
    )
}

// =============================================================================
// 테스트
// =============================================================================
