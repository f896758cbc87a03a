//! 主进程编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **分片**：统计数据集行数，按 worker 数切分区间
//! 2. **派发**：每个区间启动一个 worker 进程
//! 3. **监控**：在一个事件循环里接收 worker 汇报和退出信号
//! 4. **重试**：worker 异常退出时，用新进程重跑**完全相同**的区间，
//!    每个区间最多尝试 `max_range_attempts` 次，两次尝试之间线性退避
//! 5. **统计**：汇总各区间结果，列出被放弃的区间
//!
//! 主进程不会因为任何 worker 错误而退出。

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AppResult, ConfigError};
use crate::models::{Dataset, WorkRange};
use crate::orchestrator::ipc::WorkerMessage;
use crate::orchestrator::partitioner::partition_span;
use crate::orchestrator::range_worker::RangeSummary;
use crate::orchestrator::spawner::{
    ExitState, ProcessSpawner, SignalKind, WorkerSignal, WorkerSpawner,
};
use crate::utils::logging;

/// 一次失败尝试的类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerFailure {
    /// worker 报告浏览器/传输层初始化失败
    #[error("初始化失败: {reason}")]
    InitFailed { reason: String },
    /// 未完成就异常退出
    #[error("异常退出 ({})", exit_text(.code))]
    Crashed { code: Option<i32> },
    /// 操作系统无法启动进程，或任务下发失败
    #[error("无法启动: {reason}")]
    SpawnFailed { reason: String },
}

fn exit_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("退出码 {code}"),
        None => "被信号终止".to_string(),
    }
}

/// 被放弃的区间
#[derive(Debug, Clone, PartialEq)]
pub struct AbandonedRange {
    pub range: WorkRange,
    pub attempts: u32,
    pub last_failure: WorkerFailure,
}

/// 一次完整运行的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlReport {
    pub completed: usize,
    pub abandoned: Vec<AbandonedRange>,
    /// 替补 worker 的数量
    pub respawns: u32,
    /// 所有 `done` 汇报的累加
    pub totals: RangeSummary,
}

impl CrawlReport {
    fn absorb(&mut self, summary: &RangeSummary) {
        self.totals.attempted += summary.attempted;
        self.totals.inserted += summary.inserted;
        self.totals.duplicates += summary.duplicates;
        self.totals.navigation_failures += summary.navigation_failures;
        self.totals.malformed_rows += summary.malformed_rows;
        self.totals.persist_failures += summary.persist_failures;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RangeStatus {
    Running,
    WaitingRetry,
    Done,
    Abandoned,
}

struct RangeSlot {
    range: WorkRange,
    attempts: u32,
    status: RangeStatus,
}

/// 当前一次尝试中 worker 的汇报
#[derive(Default)]
struct AttemptState {
    slot: usize,
    init_failure: Option<String>,
    summary: Option<RangeSummary>,
}

/// 重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_range_attempts,
            backoff_base: config.retry_backoff(1),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }
}

/// worker 进程编排器
pub struct Orchestrator<S: WorkerSpawner> {
    spawner: S,
    policy: RetryPolicy,
    slots: Vec<RangeSlot>,
    attempts: HashMap<usize, AttemptState>,
    next_worker_id: usize,
    report: CrawlReport,
}

impl<S: WorkerSpawner> Orchestrator<S> {
    pub fn new(spawner: S, policy: RetryPolicy) -> Self {
        Self {
            spawner,
            policy,
            slots: Vec::new(),
            attempts: HashMap::new(),
            next_worker_id: 0,
            report: CrawlReport::default(),
        }
    }

    /// 处理所有区间，直到每个区间完成或被放弃
    pub async fn run(mut self, ranges: Vec<WorkRange>) -> CrawlReport {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<WorkerSignal>();
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<usize>();

        self.slots = ranges
            .into_iter()
            .map(|range| RangeSlot {
                range,
                attempts: 0,
                status: RangeStatus::Running,
            })
            .collect();

        for slot in 0..self.slots.len() {
            self.launch(slot, &signal_tx, &retry_tx).await;
        }

        while !self.all_settled() {
            tokio::select! {
                Some(signal) = signal_rx.recv() => {
                    self.on_signal(signal, &retry_tx);
                }
                Some(slot) = retry_rx.recv() => {
                    self.launch(slot, &signal_tx, &retry_tx).await;
                }
            }
        }

        self.spawner.kill_all().await;
        self.report
    }

    fn all_settled(&self) -> bool {
        self.slots
            .iter()
            .all(|s| matches!(s.status, RangeStatus::Done | RangeStatus::Abandoned))
    }

    async fn launch(
        &mut self,
        slot: usize,
        signals: &mpsc::UnboundedSender<WorkerSignal>,
        retries: &mpsc::UnboundedSender<usize>,
    ) {
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        let entry = &mut self.slots[slot];
        entry.attempts += 1;
        entry.status = RangeStatus::Running;
        if entry.attempts > 1 {
            self.report.respawns += 1;
        }
        let range = entry.range.clone();
        let attempt = entry.attempts;

        info!(
            "[worker {}] 🚀 启动: 区间 {} (第 {} 次尝试)",
            worker_id, range, attempt
        );

        match self.spawner.spawn(worker_id, &range, signals.clone()).await {
            Ok(()) => {
                self.attempts.insert(
                    worker_id,
                    AttemptState {
                        slot,
                        ..AttemptState::default()
                    },
                );
            }
            Err(e) => {
                let failure = WorkerFailure::SpawnFailed {
                    reason: e.to_string(),
                };
                self.on_failure(slot, worker_id, failure, retries);
            }
        }
    }

    fn on_signal(&mut self, signal: WorkerSignal, retries: &mpsc::UnboundedSender<usize>) {
        let worker_id = signal.worker_id;
        let Some(state) = self.attempts.get_mut(&worker_id) else {
            warn!("[worker {}] 收到未知 worker 的信号，忽略", worker_id);
            return;
        };

        match signal.kind {
            SignalKind::Reported(WorkerMessage::Online { pid }) => {
                info!("[worker {}] ✓ 已上线 (pid {})", worker_id, pid);
            }
            SignalKind::Reported(WorkerMessage::Fail { reason, .. }) => {
                warn!(
                    "[worker {}] ⚠️ 报告失败: {}",
                    worker_id,
                    logging::truncate_text(&reason, 200)
                );
                state.init_failure = Some(reason);
            }
            SignalKind::Reported(WorkerMessage::Done { summary, .. }) => {
                state.summary = Some(summary);
            }
            SignalKind::Exited(exit) => {
                let Some(state) = self.attempts.remove(&worker_id) else {
                    return;
                };
                let slot = state.slot;
                match (state.summary, exit) {
                    (Some(summary), _) => self.on_complete(slot, worker_id, Some(summary)),
                    (None, ExitState::Success) => self.on_complete(slot, worker_id, None),
                    (None, ExitState::Failed { code }) => {
                        let failure = match state.init_failure {
                            Some(reason) => WorkerFailure::InitFailed { reason },
                            None => WorkerFailure::Crashed { code },
                        };
                        self.on_failure(slot, worker_id, failure, retries);
                    }
                }
            }
        }
    }

    fn on_complete(&mut self, slot: usize, worker_id: usize, summary: Option<RangeSummary>) {
        let entry = &mut self.slots[slot];
        entry.status = RangeStatus::Done;
        self.report.completed += 1;
        match summary {
            Some(summary) => {
                logging::log_range_complete(&entry.range, &summary);
                self.report.absorb(&summary);
            }
            None => info!("[worker {}] ✓ 区间 {} 完成", worker_id, entry.range),
        }
    }

    fn on_failure(
        &mut self,
        slot: usize,
        worker_id: usize,
        failure: WorkerFailure,
        retries: &mpsc::UnboundedSender<usize>,
    ) {
        let entry = &mut self.slots[slot];

        if entry.attempts >= self.policy.max_attempts {
            error!(
                "[worker {}] ❌ 区间 {} 已尝试 {} 次，放弃: {}",
                worker_id, entry.range, entry.attempts, failure
            );
            entry.status = RangeStatus::Abandoned;
            self.report.abandoned.push(AbandonedRange {
                range: entry.range.clone(),
                attempts: entry.attempts,
                last_failure: failure,
            });
            return;
        }

        let delay = self.policy.backoff(entry.attempts);
        warn!(
            "[worker {}] ⚠️ 区间 {} 失败 ({})，{} ms 后由新 worker 重试",
            worker_id,
            entry.range,
            failure,
            delay.as_millis()
        );
        entry.status = RangeStatus::WaitingRetry;

        let retries = retries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = retries.send(slot);
        });
    }
}

/// `crawl` 子命令的参数
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// 起始行（含）
    pub start: Option<u64>,
    /// 结束行（含）
    pub end: Option<u64>,
    /// 覆盖配置中的 worker 数
    pub workers: Option<usize>,
    /// 传给 worker 进程的配置文件
    pub config_path: Option<PathBuf>,
}

/// 计算 worker 数：配置值（或 CPU 并行度）与待处理行数取小
pub fn worker_count(configured: Option<usize>, lines: u64) -> usize {
    let wanted = configured.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let cap = usize::try_from(lines).unwrap_or(usize::MAX);
    wanted.max(1).min(cap)
}

/// 主进程入口：切分数据集并用子进程抓取
pub async fn crawl(config: &Config, options: CrawlOptions) -> AppResult<CrawlReport> {
    let dataset = Dataset::new(&config.dataset_path);
    let total = dataset.count_lines().await?;
    if total == 0 {
        warn!("⚠️ 数据集为空，没有需要处理的行");
        return Ok(CrawlReport::default());
    }

    let first = options.start.unwrap_or(0);
    let last = options.end.unwrap_or(total - 1).min(total - 1);
    if first > last {
        return Err(ConfigError::Invalid {
            field: "start".to_string(),
            reason: format!("起始行 {first} 超出范围 (数据集共 {total} 行, 结束行 {last})"),
        }
        .into());
    }

    let lines = last - first + 1;
    let workers = worker_count(options.workers.or(config.max_workers), lines);
    let ranges = partition_span(&config.dataset_path, first, lines, workers)
        .map_err(|e| ConfigError::Invalid {
            field: "workers".to_string(),
            reason: e.to_string(),
        })?;

    logging::log_startup(workers, first, last, total);

    let spawner = ProcessSpawner::current_exe(options.config_path)?;
    let report = Orchestrator::new(spawner, RetryPolicy::from_config(config))
        .run(ranges)
        .await;

    logging::print_final_stats(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IpcError;
    use crate::orchestrator::partitioner::partition;
    use crate::orchestrator::spawner::SignalSender;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy)]
    enum Attempt {
        Complete,
        Crash,
        InitFail,
        /// 报了 online、没报 fail 就以 1 退出（例如存储打不开）
        ExitWithoutReport,
        SpawnError,
    }

    /// 按区间起始行预设每次尝试的结果，未预设的尝试都成功
    #[derive(Default)]
    struct FakeSpawner {
        plans: HashMap<u64, VecDeque<Attempt>>,
        spawned: Arc<Mutex<Vec<WorkRange>>>,
        killed: Arc<Mutex<bool>>,
    }

    impl FakeSpawner {
        fn plan(mut self, start_line: u64, attempts: &[Attempt]) -> Self {
            self.plans
                .insert(start_line, attempts.iter().copied().collect());
            self
        }
    }

    impl WorkerSpawner for FakeSpawner {
        async fn spawn(
            &mut self,
            worker_id: usize,
            range: &WorkRange,
            signals: SignalSender,
        ) -> Result<(), IpcError> {
            self.spawned.lock().unwrap().push(range.clone());
            let attempt = self
                .plans
                .get_mut(&range.start_line)
                .and_then(|q| q.pop_front())
                .unwrap_or(Attempt::Complete);

            let send = move |kind| {
                let _ = signals.send(WorkerSignal { worker_id, kind });
            };
            match attempt {
                Attempt::SpawnError => {
                    return Err(IpcError::Unexpected("no such executable".to_string()))
                }
                Attempt::Complete => {
                    let summary = RangeSummary {
                        attempted: range.len(),
                        inserted: range.len(),
                        ..RangeSummary::default()
                    };
                    send(SignalKind::Reported(WorkerMessage::Online { pid: 1000 }));
                    send(SignalKind::Reported(WorkerMessage::done(range, summary)));
                    send(SignalKind::Exited(ExitState::Success));
                }
                Attempt::Crash => {
                    send(SignalKind::Exited(ExitState::Failed { code: None }));
                }
                Attempt::InitFail => {
                    send(SignalKind::Reported(WorkerMessage::fail(range, "chrome missing")));
                    send(SignalKind::Exited(ExitState::Failed { code: Some(1) }));
                }
                Attempt::ExitWithoutReport => {
                    send(SignalKind::Reported(WorkerMessage::Online { pid: 1001 }));
                    send(SignalKind::Exited(ExitState::Failed { code: Some(1) }));
                }
            }
            Ok(())
        }

        async fn kill_all(&mut self) {
            *self.killed.lock().unwrap() = true;
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff_base: Duration::from_millis(1000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_range_is_respawned_unchanged() {
        let ranges = partition(Path::new("top.csv"), 10, 4).unwrap();
        let spawner = FakeSpawner::default().plan(6, &[Attempt::Crash]);
        let spawned = Arc::clone(&spawner.spawned);
        let killed = Arc::clone(&spawner.killed);

        let report = Orchestrator::new(spawner, policy(5)).run(ranges).await;

        let spawned = spawned.lock().unwrap();
        assert_eq!(spawned.len(), 5);
        let retried: Vec<_> = spawned.iter().filter(|r| r.start_line == 6).collect();
        assert_eq!(retried.len(), 2);
        assert_eq!(retried[1], &WorkRange::new("top.csv", 6, 9));

        assert_eq!(report.completed, 4);
        assert_eq!(report.respawns, 1);
        assert!(report.abandoned.is_empty());
        assert_eq!(report.totals.inserted, 10);
        assert!(*killed.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_range_abandoned_after_max_attempts() {
        let ranges = partition(Path::new("top.csv"), 4, 2).unwrap();
        let spawner = FakeSpawner::default().plan(
            2,
            &[Attempt::InitFail, Attempt::Crash, Attempt::InitFail, Attempt::Complete],
        );
        let spawned = Arc::clone(&spawner.spawned);

        let report = Orchestrator::new(spawner, policy(3)).run(ranges).await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.abandoned.len(), 1);
        let abandoned = &report.abandoned[0];
        assert_eq!(abandoned.range, WorkRange::new("top.csv", 2, 3));
        assert_eq!(abandoned.attempts, 3);
        assert_eq!(
            abandoned.last_failure,
            WorkerFailure::InitFailed {
                reason: "chrome missing".to_string()
            }
        );
        assert_eq!(spawned.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_without_fail_report_is_a_crash() {
        let ranges = vec![WorkRange::new("top.csv", 0, 3)];
        let spawner = FakeSpawner::default().plan(0, &[Attempt::ExitWithoutReport]);

        let report = Orchestrator::new(spawner, policy(1)).run(ranges).await;

        assert_eq!(report.abandoned.len(), 1);
        assert_eq!(
            report.abandoned[0].last_failure,
            WorkerFailure::Crashed { code: Some(1) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_linear_backoff() {
        let ranges = vec![WorkRange::new("top.csv", 0, 0)];
        let spawner = FakeSpawner::default().plan(0, &[Attempt::Crash, Attempt::Crash]);

        let started = tokio::time::Instant::now();
        let report = Orchestrator::new(spawner, policy(5)).run(ranges).await;

        // 1000 × 1 + 1000 × 2
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(3000));
        assert!(waited < Duration::from_millis(3100));
        assert_eq!(report.completed, 1);
        assert_eq!(report.respawns, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_is_retried() {
        let ranges = vec![WorkRange::new("top.csv", 0, 3)];
        let spawner = FakeSpawner::default().plan(0, &[Attempt::SpawnError]);

        let report = Orchestrator::new(spawner, policy(2)).run(ranges).await;
        assert_eq!(report.completed, 1);
        assert!(report.abandoned.is_empty());
    }

    #[test]
    fn test_worker_count_is_capped_by_lines() {
        assert_eq!(worker_count(Some(8), 3), 3);
        assert_eq!(worker_count(Some(2), 1000), 2);
        assert_eq!(worker_count(None, 1), 1);
    }

    #[test]
    fn test_failure_display() {
        assert!(WorkerFailure::Crashed { code: Some(101) }
            .to_string()
            .contains("101"));
        assert_eq!(
            WorkerFailure::Crashed { code: None }.to_string(),
            "异常退出 (被信号终止)"
        );
        assert_eq!(
            WorkerFailure::InitFailed {
                reason: "no chrome".to_string()
            }
            .to_string(),
            "初始化失败: no chrome"
        );
    }
}
