//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责切分数据集、管理 worker 进程和逐行调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `master` - 主进程编排器
//! - 统计数据集行数，决定 worker 数量
//! - 为每个区间启动 worker 进程并下发任务
//! - 监控进程退出，异常时用新进程重跑相同区间（有次数上限）
//! - 输出全局统计信息
//!
//! ### `range_worker` - 区间处理器
//! - 在 worker 进程内逐行处理一个区间
//! - 每行运行一个 `CaptureSession` 并写入存储
//! - 行内错误只记日志，不中断区间
//!
//! ### `partitioner` / `spawner` / `ipc`
//! - 纯函数分片、子进程启动与监控、JSON 行消息
//!
//! ## 层次关系
//!
//! ```text
//! master (处理 Vec<WorkRange>，多进程)
//!     ↓  stdin/stdout JSON 行
//! range_worker (处理一个 WorkRange 的所有行)
//!     ↓
//! workflow::CaptureSession (处理单个 URL)
//!     ↓
//! services (能力层：CaptureStore)  /  browser (传输层：ChromeTransport)
//!     ↓
//! infrastructure (基础设施：JsExecutor)
//! ```

pub mod ipc;
pub mod master;
pub mod partitioner;
pub mod range_worker;
pub mod spawner;

// 重新导出主要类型
pub use master::{crawl, CrawlOptions, CrawlReport, Orchestrator, RetryPolicy, WorkerFailure};
pub use partitioner::{partition, partition_span, slice_for, PartitionError};
pub use range_worker::{run_worker_process, scrape, RangeSummary, RangeWorker};
pub use spawner::{ProcessSpawner, WorkerSpawner};
