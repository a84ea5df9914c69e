//! 수집 통계 구조체.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// 배치 하나의 수집 통계
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// 배치의 레코드 수
    pub records: usize,
    /// 필수 필드 누락으로 제외된 레코드 수
    pub malformed: usize,
    /// 변환 실패로 제외된 호가 레벨 수
    pub skipped_levels: usize,
    /// 테이블별 기록 행 수
    pub rows_by_table: BTreeMap<String, u64>,
    /// 기록된 총 행 수 (다중 행 확장 포함)
    pub rows_written: u64,
    /// 저장소가 보고한 영향 행 수 (충돌로 무시된 행 제외)
    pub rows_affected: u64,
    /// 실행된 배치 구문 수
    pub flushes: usize,
    /// 커밋된 오프셋
    pub offset: u64,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl IngestStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 유효 레코드 비율 (%)
    pub fn valid_rate(&self) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            ((self.records - self.malformed) as f64 / self.records as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, stream: &str) {
        tracing::info!(
            stream = stream,
            offset = self.offset,
            records = self.records,
            malformed = self.malformed,
            skipped_levels = self.skipped_levels,
            rows_written = self.rows_written,
            rows_affected = self.rows_affected,
            flushes = self.flushes,
            valid_rate = format!("{:.1}%", self.valid_rate()),
            elapsed = format!("{:.3}s", self.elapsed.as_secs_f64()),
            "배치 수집 완료"
        );
    }
}
