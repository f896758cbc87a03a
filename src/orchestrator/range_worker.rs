//! 区间处理器 - 编排层
//!
//! ## 职责
//!
//! 在一个 worker 进程内，按行号顺序处理分配到的 `WorkRange`：
//!
//! 1. **读取**：从数据集游标读取第 i 行
//! 2. **解析**：`rank,url`，格式错误的行计数后跳过
//! 3. **抓取**：复用同一个传输层和邮箱，每行跑一个 `CaptureSession`
//! 4. **存储**：以 rank 为键条件写入
//!
//! 行内错误只记日志并继续下一行；浏览器初始化失败、数据集或存储打不开时，
//! 整段交还主进程重试。

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::browser::{ChromeTransport, Mailbox, PageTransport};
use crate::config::Config;
use crate::error::{AppResult, DatasetError, IpcError};
use crate::models::{Dataset, WorkRange};
use crate::orchestrator::ipc::{self, MasterMessage, WorkerMessage};
use crate::services::{CaptureStore, UpsertOutcome};
use crate::utils::logging;
use crate::workflow::{CaptureCtx, CaptureSession, CaptureSettings};

/// 单个区间的处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeSummary {
    /// 实际读取到的行数
    pub attempted: u64,
    /// 新写入的记录
    pub inserted: u64,
    /// 已存在、未覆盖的记录
    pub duplicates: u64,
    /// 导航失败 / 超时 / 快照失败
    pub navigation_failures: u64,
    /// 无法解析的行
    pub malformed_rows: u64,
    /// 写库失败
    pub persist_failures: u64,
}

/// 顺序处理一个区间的所有行
pub struct RangeWorker<'a, T: PageTransport> {
    transport: &'a T,
    mailbox: &'a mut Mailbox,
    store: &'a CaptureStore,
    settings: CaptureSettings,
}

impl<'a, T: PageTransport> RangeWorker<'a, T> {
    pub fn new(
        transport: &'a T,
        mailbox: &'a mut Mailbox,
        store: &'a CaptureStore,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            transport,
            mailbox,
            store,
            settings,
        }
    }

    /// 处理整个区间
    ///
    /// 只有数据集本身打不开或读失败时返回错误，单行错误都计入统计。
    pub async fn run(&mut self, range: &WorkRange) -> Result<RangeSummary, DatasetError> {
        let dataset = Dataset::new(&range.dataset_path);
        let mut cursor = dataset.cursor_at(range.start_line).await?;
        let mut summary = RangeSummary::default();

        logging::log_range_start(range);

        while cursor.position() <= range.end_line {
            let Some((line, parsed)) = cursor.next_row().await? else {
                warn!(
                    "⚠️ 数据集在第 {} 行结束，早于区间终点 {}",
                    cursor.position(),
                    range.end_line
                );
                break;
            };
            summary.attempted += 1;

            let row = match parsed {
                Ok(row) => row,
                Err(e) => {
                    warn!("[行 #{}] ⚠️ 跳过无法解析的行: {}", line, e);
                    summary.malformed_rows += 1;
                    continue;
                }
            };

            let ctx = CaptureCtx::from_row(line, &row);
            self.process_row(ctx, &mut summary).await;
        }

        logging::log_range_complete(range, &summary);
        Ok(summary)
    }

    async fn process_row(&mut self, ctx: CaptureCtx, summary: &mut RangeSummary) {
        let session = CaptureSession::new(self.transport, self.mailbox, self.settings, ctx.clone());
        let outcome = match session.run().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} ❌ 抓取会话异常: {}", ctx, e);
                summary.navigation_failures += 1;
                return;
            }
        };

        if let Some(failure) = &outcome.failure {
            warn!(
                "{} ⚠️ 本行抓取不完整: {}",
                ctx,
                logging::truncate_text(&failure.to_string(), 200)
            );
            summary.navigation_failures += 1;
        }

        match self.store.upsert_if_absent(&outcome.record).await {
            Ok(UpsertOutcome::Inserted) => summary.inserted += 1,
            Ok(UpsertOutcome::AlreadyPresent) => {
                info!("{} 记录已存在，保留原记录", ctx);
                summary.duplicates += 1;
            }
            Err(e) => {
                error!("{} ❌ 写入失败 (url: {}): {}", ctx, ctx.url, e);
                summary.persist_failures += 1;
            }
        }
    }
}

/// 在当前进程内抓取一个区间：打开存储、启动浏览器、逐行处理、释放资源
///
/// 浏览器初始化失败时返回的错误满足 [`crate::error::AppError::is_range_fatal`]。
pub async fn scrape(config: &Config, range: &WorkRange) -> AppResult<RangeSummary> {
    let store = CaptureStore::open(&config.database_path).await?;
    let mut mailbox = Mailbox::new();

    let transport = match ChromeTransport::open(config, &mailbox).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("❌ 浏览器初始化失败: {}", e);
            store.close().await;
            return Err(e.into());
        }
    };

    let settings = CaptureSettings::from_config(config);
    let result = RangeWorker::new(&transport, &mut mailbox, &store, settings)
        .run(range)
        .await;

    transport.close().await;
    store.close().await;
    Ok(result?)
}

/// worker 子进程入口
///
/// 从 stdin 读取任务，向 stdout 汇报 `online` / `done` / `fail`。
/// 只有浏览器初始化失败才发 `fail`。
/// 返回错误时调用方以退出码 1 结束进程，主进程据此重试整段。
pub async fn run_worker_process(config: &Config) -> AppResult<RangeSummary> {
    let mut stdout = tokio::io::stdout();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let assignment: MasterMessage = ipc::read_message(&mut stdin)
        .await?
        .ok_or(IpcError::NoAssignment)?;
    let range = assignment.into_range();

    ipc::write_message(
        &mut stdout,
        &WorkerMessage::Online {
            pid: std::process::id(),
        },
    )
    .await?;
    info!("📥 收到任务: 区间 {} ({})", range, range.dataset_path.display());

    match scrape(config, &range).await {
        Ok(summary) => {
            ipc::write_message(&mut stdout, &WorkerMessage::done(&range, summary)).await?;
            Ok(summary)
        }
        Err(e) => {
            // 数据集、存储等错误不发 fail，主进程按崩溃处理
            if e.is_range_fatal() {
                let reason = e.to_string();
                if let Err(send_err) =
                    ipc::write_message(&mut stdout, &WorkerMessage::fail(&range, &reason)).await
                {
                    warn!("无法向主进程汇报失败: {}", send_err);
                }
            }
            Err(e)
        }
    }
}
