//! worker 进程的启动与监控
//!
//! 每个 worker 是当前可执行文件的一个 `worker` 子命令进程：
//! 任务写进子进程 stdin，子进程 stdout 的每一行汇报和最终退出状态
//! 都转换成 [`WorkerSignal`] 送回主进程的事件循环。

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::IpcError;
use crate::models::WorkRange;
use crate::orchestrator::ipc::{self, MasterMessage, WorkerMessage};

/// worker 进程的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Success,
    /// 非零退出码；被信号杀死时没有退出码
    Failed { code: Option<i32> },
}

impl From<ExitStatus> for ExitState {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            ExitState::Success
        } else {
            ExitState::Failed {
                code: status.code(),
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    /// worker 在 stdout 上的一条汇报
    Reported(WorkerMessage),
    /// 进程已退出，之后不会再有该 worker 的信号
    Exited(ExitState),
}

/// 送回主进程事件循环的 worker 信号
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSignal {
    pub worker_id: usize,
    pub kind: SignalKind,
}

pub type SignalSender = UnboundedSender<WorkerSignal>;

/// 启动 worker 的方式
pub trait WorkerSpawner {
    /// 启动一个 worker 并下发区间
    ///
    /// 返回 `Ok` 之后，该 worker 必然在某个时刻送回一个 `Exited` 信号。
    fn spawn(
        &mut self,
        worker_id: usize,
        range: &WorkRange,
        signals: SignalSender,
    ) -> impl Future<Output = Result<(), IpcError>>;

    /// 结束所有仍在运行的 worker
    fn kill_all(&mut self) -> impl Future<Output = ()>;
}

/// 以子进程方式启动 worker
pub struct ProcessSpawner {
    executable: PathBuf,
    config_path: Option<PathBuf>,
    monitors: HashMap<usize, JoinHandle<()>>,
}

impl ProcessSpawner {
    /// 使用当前可执行文件作为 worker
    pub fn current_exe(config_path: Option<PathBuf>) -> Result<Self, IpcError> {
        Ok(Self::new(std::env::current_exe()?, config_path))
    }

    pub fn new(executable: PathBuf, config_path: Option<PathBuf>) -> Self {
        Self {
            executable,
            config_path,
            monitors: HashMap::new(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.executable);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .arg("worker")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

impl WorkerSpawner for ProcessSpawner {
    async fn spawn(
        &mut self,
        worker_id: usize,
        range: &WorkRange,
        signals: SignalSender,
    ) -> Result<(), IpcError> {
        self.monitors.retain(|_, task| !task.is_finished());

        let mut child = self.command().spawn()?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| IpcError::Unexpected("子进程没有 stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IpcError::Unexpected("子进程没有 stdout".to_string()))?;

        ipc::write_message(&mut stdin, &MasterMessage::scrape(range)).await?;
        drop(stdin);
        debug!("[worker {}] 已下发区间 {}", worker_id, range);

        let monitor = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match ipc::read_message::<_, WorkerMessage>(&mut lines).await {
                    Ok(Some(message)) => {
                        let _ = signals.send(WorkerSignal {
                            worker_id,
                            kind: SignalKind::Reported(message),
                        });
                    }
                    Ok(None) => break,
                    Err(IpcError::Codec(e)) => {
                        warn!("[worker {}] 忽略无法解析的输出: {}", worker_id, e);
                    }
                    Err(e) => {
                        warn!("[worker {}] 读取输出失败: {}", worker_id, e);
                        break;
                    }
                }
            }

            let state = match child.wait().await {
                Ok(status) => ExitState::from(status),
                Err(e) => {
                    warn!("[worker {}] 等待进程退出失败: {}", worker_id, e);
                    ExitState::Failed { code: None }
                }
            };
            let _ = signals.send(WorkerSignal {
                worker_id,
                kind: SignalKind::Exited(state),
            });
        });
        self.monitors.insert(worker_id, monitor);
        Ok(())
    }

    async fn kill_all(&mut self) {
        // 监控任务持有 Child，中止任务即 drop Child，kill_on_drop 负责杀进程
        for (worker_id, task) in self.monitors.drain() {
            if !task.is_finished() {
                debug!("[worker {}] 终止仍在运行的进程", worker_id);
                task.abort();
            }
        }
    }
}
