//! # Script Crawler
//!
//! 按排名列表批量访问网站，记录每个页面加载的全部脚本源码、网络请求和最终 HTML
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `JsExecutor` - 唯一的 page owner，提供求值能力
//!
//! ### ② 传输层（Browser）
//! - `browser/` - 启动或连接浏览器，开启 Network / Debugger 域
//! - `ChromeTransport` - 导航、HTML 快照、脚本源码
//! - `Mailbox` - DevTools 事件邮箱，按会话代号隔离过期事件
//!
//! ### ③ 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `CaptureStore` - 以 rank 为键的条件写入（SQLite）
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 定义"一个 URL"的完整处理流程
//! - `CaptureCtx` - 上下文封装（行号 + rank + url）
//! - `CaptureSession` - 状态机（导航 → load → 快照 → 静默 → 定稿）
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/master` - 主进程，切分数据集并管理 worker 进程
//! - `orchestrator/range_worker` - worker 进程内逐行处理一个区间
//!
//! ## 模块结构

pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use browser::{ChromeTransport, Mailbox, PageTransport};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::JsExecutor;
pub use models::{CaptureRecord, DatasetRow, WorkRange};
pub use orchestrator::{Orchestrator, RangeSummary, RangeWorker};
pub use services::{CaptureStore, UpsertOutcome};
pub use workflow::{CaptureCtx, CaptureSession, CaptureState};
