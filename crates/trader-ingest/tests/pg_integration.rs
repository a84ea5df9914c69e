//! PostgreSQL 저장소 통합 테스트.
//!
//! ## 테스트 목적
//! 인메모리 저장소가 아닌 실제 PostgreSQL에서 수집 경로 전체를 검증합니다:
//! 1. 같은 배치 재수집 시 행이 늘지 않는지
//! 2. 구문 실패 시 행과 오프셋이 함께 롤백되는지
//! 3. 같은 지표 키가 한 배치에 두 번 나와도 커밋되는지
//! 4. 빈 배치도 오프셋을 전진시키는지
//! 5. 연결 1개짜리 풀에서도 세션이 깨끗하게 반환되는지
//!
//! ## 테스트 실행 조건
//!
//! 환경 변수 `DATABASE_URL`이 설정되어 있어야 합니다.
//! 설정되지 않은 경우 테스트가 건너뛰어집니다.
//!
//! 테이블은 `CREATE TABLE IF NOT EXISTS`로 준비하고, 실행마다 고유한 심볼과
//! 스트림 이름을 써서 이전 실행의 데이터와 섞이지 않게 합니다.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use trader_ingest::schema::{all_schemas, offset_table_sql};
use trader_ingest::{
    DatabaseConfig, FieldValue, IngestCoordinator, IngestStore, PgStore, Record, RecordKind,
    StoreSession,
};

const T0: i64 = 1_700_000_000_000;

/// 테스트용 PgStore 생성 (테이블 준비 포함).
async fn get_test_store(max_connections: u32, statement_timeout_ms: u64) -> Option<PgStore> {
    let database_url = env::var("DATABASE_URL").ok()?;

    let config = DatabaseConfig {
        url: database_url,
        max_connections,
        min_connections: 0,
        acquire_timeout_secs: 10,
        statement_timeout_ms,
        ..Default::default()
    };
    let store = PgStore::connect(&config).await.ok()?;
    prepare_schema(store.pool()).await;
    Some(store)
}

/// 동시에 실행되는 테스트끼리 DDL이 겹치지 않도록 advisory lock 안에서 생성.
async fn prepare_schema(pool: &PgPool) {
    let mut tx = pool.begin().await.unwrap();
    sqlx::query("SELECT pg_advisory_xact_lock(730001)")
        .execute(&mut *tx)
        .await
        .unwrap();
    for schema in all_schemas() {
        sqlx::query(&schema.table.create_table_sql())
            .execute(&mut *tx)
            .await
            .unwrap();
    }
    sqlx::query(&offset_table_sql())
        .execute(&mut *tx)
        .await
        .unwrap();
    tx.commit().await.unwrap();
}

/// 실행마다 고유한 이름.
fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, Utc::now().timestamp_micros())
}

async fn count_rows(pool: &PgPool, table: &str, symbol: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE symbol = $1", table))
        .bind(symbol)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn kline(symbol: &str, minute: i64) -> Record {
    let start = T0 + minute * 60_000;
    Record::new(RecordKind::Kline)
        .with("symbol", symbol)
        .with("start", start)
        .with("end", start + 59_999)
        .with("open", "42000.5")
        .with("close", "42010")
        .with("high", "42020")
        .with("low", "41990.25")
        .with("volume", "3.2")
}

fn trade(symbol: &str, i: i64) -> Record {
    Record::new(RecordKind::PublicTrade)
        .with("symbol", symbol)
        .with("tradeTime", T0 + i)
        .with("tradeId", format!("t-{}", i))
        .with("side", "Buy")
        .with("price", "42000")
        .with("size", "0.01")
        .with("isBlockTrade", false)
}

macro_rules! require_store {
    ($max:expr, $timeout_ms:expr) => {
        match get_test_store($max, $timeout_ms).await {
            Some(store) => Arc::new(store),
            None => {
                eprintln!("Skipping test: DATABASE_URL not set");
                return;
            }
        }
    };
}

/// 자연 키 배치 재수집 - 행 수 불변, 오프셋 기록
#[tokio::test]
async fn test_pg_reingest_natural_key_batch() {
    let store = require_store!(4, 30_000);
    let coordinator = IngestCoordinator::new(Arc::clone(&store), 2);
    let symbol = unique("KL");
    let stream = unique("kline");
    let batch: Vec<Record> = (0..5).map(|m| kline(&symbol, m)).collect();

    assert_eq!(coordinator.get_offset(&stream).await.unwrap(), None);
    assert_eq!(coordinator.ingest(&stream, &batch, 5).await.unwrap(), 5);
    assert_eq!(coordinator.ingest(&stream, &batch, 5).await.unwrap(), 5);

    assert_eq!(count_rows(store.pool(), "kline", &symbol).await, 5);
    assert_eq!(coordinator.get_offset(&stream).await.unwrap(), Some(5));
}

/// 같은 오프셋으로 재전송된 체결 배치 - ingest_key로 중복 제거
#[tokio::test]
async fn test_pg_reingest_trades_with_same_offset() {
    let store = require_store!(4, 30_000);
    let coordinator = IngestCoordinator::new(Arc::clone(&store), 3);
    let symbol = unique("TR");
    let stream = unique("trade");
    let batch: Vec<Record> = (0..7).map(|i| trade(&symbol, i)).collect();

    coordinator.ingest(&stream, &batch, 11).await.unwrap();
    coordinator.ingest(&stream, &batch, 11).await.unwrap();

    assert_eq!(count_rows(store.pool(), "public_trade", &symbol).await, 7);
}

/// 같은 지표 키가 한 배치에 두 번 - 마지막 값으로 커밋
#[tokio::test]
async fn test_pg_indicator_repeated_key_in_one_batch() {
    let store = require_store!(4, 30_000);
    let coordinator = IngestCoordinator::new(Arc::clone(&store), 100);
    let symbol = unique("IND");
    let stream = unique("ind-dup");
    let indicator = |close: &str| {
        Record::new(RecordKind::Indicator)
            .with("symbol", symbol.as_str())
            .with("timestamp", T0)
            .with("closePrice", close)
    };
    let batch = [indicator("100"), indicator("101")];

    assert_eq!(coordinator.ingest(&stream, &batch, 7).await.unwrap(), 2);
    assert_eq!(coordinator.ingest(&stream, &batch, 7).await.unwrap(), 2);

    let closes: Vec<Decimal> =
        sqlx::query_scalar("SELECT close_price FROM indicator WHERE symbol = $1")
            .bind(&symbol)
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert_eq!(closes, vec![dec!(101)]);
    assert_eq!(coordinator.get_offset(&stream).await.unwrap(), Some(7));
}

/// 구문 타임아웃으로 실패한 배치 - 이미 플러시된 행과 오프셋 모두 롤백
#[tokio::test]
async fn test_pg_failed_statement_rolls_back_batch() {
    let store = require_store!(4, 1_000);
    let coordinator = IngestCoordinator::new(Arc::clone(&store), 1);
    let symbol = unique("LQ");
    let stream = unique("liq");

    coordinator
        .ingest(&stream, &[trade(&symbol, 0)], 1)
        .await
        .unwrap();

    // 다른 연결에서 liquidation 테이블을 잠가 INSERT가 statement_timeout에 걸리게 함
    let mut locker = store.pool().begin().await.unwrap();
    sqlx::query("LOCK TABLE liquidation IN ACCESS EXCLUSIVE MODE")
        .execute(&mut *locker)
        .await
        .unwrap();

    let batch = vec![
        trade(&symbol, 1),
        Record::new(RecordKind::Liquidation)
            .with("symbol", symbol.as_str())
            .with("eventTime", T0)
            .with("side", "Sell")
            .with("size", "0.5")
            .with("price", "41000"),
    ];
    let err = coordinator.ingest(&stream, &batch, 2).await.unwrap_err();
    locker.rollback().await.unwrap();

    assert!(err.is_persistence(), "unexpected error: {}", err);
    assert_eq!(coordinator.get_offset(&stream).await.unwrap(), Some(1));
    assert_eq!(count_rows(store.pool(), "public_trade", &symbol).await, 1);
    assert_eq!(count_rows(store.pool(), "liquidation", &symbol).await, 0);
}

/// 빈 배치 - 0행, 오프셋 전진
#[tokio::test]
async fn test_pg_empty_batch_advances_offset() {
    let store = require_store!(2, 30_000);
    let coordinator = IngestCoordinator::new(Arc::clone(&store), 10);
    let stream = unique("empty");

    assert_eq!(coordinator.ingest(&stream, &[], 9).await.unwrap(), 0);
    assert_eq!(coordinator.get_offset(&stream).await.unwrap(), Some(9));
}

/// 연결 1개 풀 - 커밋, 롤백, 세션 drop 이후에도 같은 연결을 재사용
#[tokio::test]
async fn test_pg_single_connection_pool_reuse() {
    let Ok(database_url) = env::var("DATABASE_URL") else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&database_url)
        .await
        .unwrap();
    prepare_schema(&pool).await;
    let store = Arc::new(PgStore::from_pool(pool));
    let coordinator = IngestCoordinator::new(Arc::clone(&store), 2);
    let symbol = unique("ONE");
    let stream = unique("one");

    for offset in 1..=3u64 {
        let batch = vec![kline(&symbol, offset as i64)];
        coordinator.ingest(&stream, &batch, offset).await.unwrap();
    }

    // 열린 트랜잭션을 가진 세션을 drop - 커밋되지 않아야 함
    {
        let mut session = store.acquire().await.unwrap();
        session.set_auto_commit(false).await.unwrap();
        session.upsert_offset(&stream, 99).await.unwrap();
    }

    assert_eq!(coordinator.get_offset(&stream).await.unwrap(), Some(3));
    assert_eq!(count_rows(store.pool(), "kline", &symbol).await, 3);
}

/// 호가 스냅샷 - 매수 호가만 있는 경우 레벨 수만큼 행 생성
#[tokio::test]
async fn test_pg_order_book_bids_only() {
    let store = require_store!(2, 30_000);
    let coordinator = IngestCoordinator::new(Arc::clone(&store), 100);
    let symbol = unique("OB");
    let stream = unique("book");
    let level = |price: &str, size: &str| FieldValue::List(vec![price.into(), size.into()]);
    let snapshot = Record::new(RecordKind::OrderBook)
        .with("symbol", symbol.as_str())
        .with("engineTime", T0)
        .with("updateId", 18_231i64)
        .with("bids", vec![level("100", "1"), level("101", "2")])
        .with("asks", Vec::<FieldValue>::new());

    assert_eq!(coordinator.ingest(&stream, &[snapshot], 1).await.unwrap(), 2);

    let sides: Vec<String> = sqlx::query_scalar(
        "SELECT side FROM order_book_level WHERE symbol = $1 ORDER BY price",
    )
    .bind(&symbol)
    .fetch_all(store.pool())
    .await
    .unwrap();
    assert_eq!(sides, vec!["bid", "bid"]);
}

/// 서로 다른 스트림의 동시 수집 - 각자 독립적으로 커밋
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_streams() {
    let store = require_store!(4, 30_000);
    let coordinator = Arc::new(IngestCoordinator::new(Arc::clone(&store), 3));
    let symbol = unique("CC");
    let prefix = unique("cc");

    let jobs = (0..4i64).map(|s| {
        let coordinator = Arc::clone(&coordinator);
        let symbol = symbol.clone();
        let stream = format!("{}-{}", prefix, s);
        tokio::spawn(async move {
            let batch: Vec<Record> = (0..10).map(|i| trade(&symbol, s * 100 + i)).collect();
            coordinator.ingest(&stream, &batch, 100 + s as u64).await
        })
    });
    for result in futures::future::join_all(jobs).await {
        assert_eq!(result.unwrap().unwrap(), 10);
    }

    for s in 0..4u64 {
        let stream = format!("{}-{}", prefix, s);
        assert_eq!(coordinator.get_offset(&stream).await.unwrap(), Some(100 + s));
    }
    assert_eq!(count_rows(store.pool(), "public_trade", &symbol).await, 40);
}
