//! 스트림별 직렬 수집 워커.
//!
//! 스트림 이름마다 tokio 태스크 하나와 bounded mpsc 큐 하나를 둡니다.
//! 같은 스트림의 배치는 제출 순서대로 하나씩 적용되고, 서로 다른 스트림은
//! 동시에 진행됩니다.
//!
//! 배치가 실패하면 해당 스트림은 정지 상태가 됩니다. 정지된 스트림은 이후
//! 제출을 모두 거부하므로, 실패한 배치를 건너뛰고 오프셋이 앞서가는 일이
//! 없습니다. 호출자는 `get_offset`으로 재개 위치를 확인한 뒤 [`StreamWorkers::resume`]을
//! 호출하고 그 위치부터 다시 제출합니다.

use crate::coordinator::IngestCoordinator;
use crate::error::{IngestError, Result};
use crate::record::Record;
use crate::stats::IngestStats;
use crate::store::IngestStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct IngestJob {
    records: Vec<Record>,
    offset: u64,
    reply: oneshot::Sender<Result<IngestStats>>,
}

struct WorkerHandle {
    tx: mpsc::Sender<IngestJob>,
    halted: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

/// 제출된 배치의 결과 대기 핸들.
pub struct IngestTicket {
    stream: String,
    offset: u64,
    rx: oneshot::Receiver<Result<IngestStats>>,
}

impl IngestTicket {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// 배치가 커밋되거나 롤백될 때까지 대기.
    pub async fn wait(self) -> Result<IngestStats> {
        self.rx
            .await
            .map_err(|_| IngestError::WorkerClosed(self.stream))?
    }
}

/// 스트림별 직렬 수집 워커 풀.
pub struct StreamWorkers<S: IngestStore + 'static> {
    coordinator: Arc<IngestCoordinator<S>>,
    queue_capacity: usize,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl<S: IngestStore + 'static> StreamWorkers<S> {
    pub fn new(coordinator: Arc<IngestCoordinator<S>>, queue_capacity: usize) -> Self {
        Self {
            coordinator,
            queue_capacity: queue_capacity.max(1),
            workers: Mutex::new(HashMap::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<IngestCoordinator<S>> {
        &self.coordinator
    }

    /// 배치 제출. 큐가 가득 차면 자리가 날 때까지 대기합니다.
    pub async fn submit(
        &self,
        stream: &str,
        records: Vec<Record>,
        offset: u64,
    ) -> Result<IngestTicket> {
        let (reply, rx) = oneshot::channel();
        let job = IngestJob {
            records,
            offset,
            reply,
        };

        let tx = {
            let mut workers = self.workers.lock().await;
            workers
                .entry(stream.to_string())
                .or_insert_with(|| self.spawn_worker(stream))
                .tx
                .clone()
        };

        tx.send(job)
            .await
            .map_err(|_| IngestError::WorkerClosed(stream.to_string()))?;

        Ok(IngestTicket {
            stream: stream.to_string(),
            offset,
            rx,
        })
    }

    /// 스트림이 실패로 정지되어 있는지 확인.
    pub async fn is_halted(&self, stream: &str) -> bool {
        self.workers
            .lock()
            .await
            .get(stream)
            .map(|w| w.halted.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// 정지된 스트림을 다시 받을 수 있게 함.
    pub async fn resume(&self, stream: &str) {
        if let Some(worker) = self.workers.lock().await.get(stream) {
            if worker.halted.swap(false, Ordering::SeqCst) {
                info!(stream = stream, "스트림 워커 재개");
            }
        }
    }

    /// 워커가 있는 스트림 목록.
    pub async fn active_streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        streams.sort();
        streams
    }

    /// 큐에 남은 배치를 모두 처리한 뒤 워커 종료.
    pub async fn shutdown(&self) {
        let workers: Vec<(String, WorkerHandle)> = self.workers.lock().await.drain().collect();

        for (stream, worker) in workers {
            drop(worker.tx);
            if let Err(e) = worker.join.await {
                error!(stream = %stream, error = %e, "스트림 워커 비정상 종료");
            }
        }
        info!("모든 스트림 워커 종료");
    }

    fn spawn_worker(&self, stream: &str) -> WorkerHandle {
        let (tx, mut rx) = mpsc::channel::<IngestJob>(self.queue_capacity);
        let halted = Arc::new(AtomicBool::new(false));
        let coordinator = Arc::clone(&self.coordinator);
        let stream = stream.to_string();
        let worker_halted = Arc::clone(&halted);

        info!(stream = %stream, "스트림 워커 시작");
        let join = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = if worker_halted.load(Ordering::SeqCst) {
                    Err(IngestError::StreamHalted(format!(
                        "{} rejected offset {}",
                        stream, job.offset
                    )))
                } else {
                    let result = coordinator
                        .ingest_with_stats(&stream, &job.records, job.offset)
                        .await;
                    if let Err(e) = &result {
                        worker_halted.store(true, Ordering::SeqCst);
                        warn!(stream = %stream, offset = job.offset, error = %e, "배치 실패, 스트림 정지");
                    }
                    result
                };
                // 수신자가 사라졌어도 배치 처리는 끝난 상태
                let _ = job.reply.send(result);
            }
            info!(stream = %stream, "스트림 워커 종료");
        });

        WorkerHandle { tx, halted, join }
    }
}
