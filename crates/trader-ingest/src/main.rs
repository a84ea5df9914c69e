//! 수집기 운영 CLI.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trader_ingest::schema::{all_schemas, offset_table_sql};
use trader_ingest::{
    IngestConfig, IngestCoordinator, IngestStore, MemoryStore, PgStore, Record, RecordKind,
};

#[derive(Parser)]
#[command(name = "trader-ingest")]
#[command(about = "ZeroQuant Market Data Ingestor", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 로그 형식
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// 스트림의 커밋된 오프셋 조회
    Offset {
        #[arg(long)]
        stream: String,
    },

    /// 스트림 오프셋을 명시적으로 기록
    SetOffset {
        #[arg(long)]
        stream: String,
        #[arg(long)]
        offset: u64,
    },

    /// JSON-lines 파일 하나를 한 배치로 수집
    Ingest {
        #[arg(long)]
        stream: String,

        /// 배치 적용 후의 오프셋
        #[arg(long)]
        offset: u64,

        /// 레코드 종류 (생략 시 각 줄의 "kind" 필드 사용)
        #[arg(long)]
        kind: Option<String>,

        /// 메모리 저장소로 실행 (DB 미사용)
        #[arg(long)]
        dry_run: bool,

        file: PathBuf,
    },

    /// 참고용 DDL 출력
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 로깅 초기화
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("trader_ingest={}", cli.log_level).into());
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    let config = IngestConfig::from_env()?;

    match cli.command {
        Commands::Schema => {
            println!("{}\n", offset_table_sql());
            for schema in all_schemas() {
                println!("{}\n", schema.table.create_table_sql());
            }
        }
        Commands::Offset { stream } => {
            let store = connect(&config).await?;
            let coordinator = IngestCoordinator::new(Arc::clone(&store), config.chunk_size);
            match coordinator.get_offset(&stream).await? {
                Some(offset) => println!("{}", offset),
                None => println!("none"),
            }
            store.close().await;
        }
        Commands::SetOffset { stream, offset } => {
            let store = connect(&config).await?;
            let coordinator = IngestCoordinator::new(Arc::clone(&store), config.chunk_size);
            coordinator.offsets().upsert(&stream, offset).await?;
            tracing::info!(stream = %stream, offset = offset, "오프셋 기록 완료");
            store.close().await;
        }
        Commands::Ingest {
            stream,
            offset,
            kind,
            dry_run,
            file,
        } => {
            let kind = kind.map(|k| k.parse::<RecordKind>()).transpose()?;
            let records = read_records(&file, kind).await?;
            tracing::info!(file = %file.display(), records = records.len(), "배치 파일 로드 완료");

            if dry_run {
                let store = Arc::new(MemoryStore::new());
                let written = ingest(store, &config, &stream, &records, offset).await?;
                println!("{} rows (dry-run)", written);
            } else {
                let store = connect(&config).await?;
                let written = ingest(Arc::clone(&store), &config, &stream, &records, offset).await?;
                println!("{} rows", written);
                store.close().await;
            }
        }
    }

    Ok(())
}

async fn connect(config: &IngestConfig) -> anyhow::Result<Arc<PgStore>> {
    let store = PgStore::connect(config.require_database()?).await?;
    tracing::info!("데이터베이스 연결 성공");
    Ok(Arc::new(store))
}

async fn ingest<S: IngestStore>(
    store: Arc<S>,
    config: &IngestConfig,
    stream: &str,
    records: &[Record],
    offset: u64,
) -> anyhow::Result<u32> {
    let coordinator = IngestCoordinator::new(store, config.chunk_size);
    let written = coordinator.ingest(stream, records, offset).await?;
    Ok(written)
}

/// JSON-lines 파일에서 레코드 읽기 (빈 줄은 건너뜀)
async fn read_records(path: &Path, kind: Option<RecordKind>) -> anyhow::Result<Vec<Record>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("파일을 열 수 없습니다: {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{} JSON 파싱 실패", path.display(), line_no))?;
        let record = match kind {
            Some(kind) => Record::from_json(kind, value),
            None => Record::from_tagged_json(value),
        }
        .with_context(|| format!("{}:{} 레코드 변환 실패", path.display(), line_no))?;
        records.push(record);
    }

    Ok(records)
}
