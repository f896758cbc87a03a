//! 日志初始化
//!
//! 主进程只写 stderr；worker 进程同时写 stderr 和 `<log_dir>/worker-<pid>.log`。
//! stdout 留给 worker 向主进程汇报，任何进程都不往 stdout 写日志。
//! `RUST_LOG` 优先于配置中的 `log_level`。

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// 主进程（以及 `scrape` 子命令）的日志
pub fn init_orchestrator(level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .context("初始化日志失败")?;
    Ok(())
}

/// worker 日志文件路径
pub fn worker_log_path(log_dir: &Path, pid: u32) -> PathBuf {
    log_dir.join(format!("worker-{pid}.log"))
}

/// worker 进程的日志，返回日志文件路径
pub fn init_worker(pid: u32, log_dir: &Path, level: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("创建日志目录失败: {}", log_dir.display()))?;

    let path = worker_log_path(log_dir, pid);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("打开日志文件失败: {}", path.display()))?;

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("初始化日志失败")?;
    Ok(path)
}
