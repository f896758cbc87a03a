/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use tracing::{error, info};

use crate::models::WorkRange;
use crate::orchestrator::{CrawlReport, RangeSummary};

/// 记录主进程启动信息
///
/// # 参数
/// - `workers`: worker 进程数
/// - `first` / `last`: 本次处理的行号范围（闭区间）
/// - `total`: 数据集总行数
pub fn log_startup(workers: usize, first: u64, last: u64, total: u64) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 多进程脚本抓取模式");
    info!("📊 worker 进程数: {}", workers);
    info!("📄 处理行: {}-{} / 共 {} 行", first, last, total);
    info!("{}", "=".repeat(60));
}

/// 记录区间开始信息
pub fn log_range_start(range: &WorkRange) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理区间 {} (共 {} 行)", range, range.len());
    info!("{}", "=".repeat(60));
}

/// 记录区间完成信息
pub fn log_range_complete(range: &WorkRange, summary: &RangeSummary) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 区间 {} 完成: 写入 {}/{}，已存在 {}",
        range, summary.inserted, summary.attempted, summary.duplicates
    );
    if summary.navigation_failures + summary.malformed_rows + summary.persist_failures > 0 {
        info!(
            "⚠️ 导航失败 {}，格式错误 {}，写入失败 {}",
            summary.navigation_failures, summary.malformed_rows, summary.persist_failures
        );
    }
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(report: &CrawlReport) {
    let totals = &report.totals;
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 完成区间: {}", report.completed);
    info!("🔁 替补 worker: {}", report.respawns);
    info!("📥 新写入: {}/{}", totals.inserted, totals.attempted);
    info!("📎 已存在: {}", totals.duplicates);
    info!("❌ 导航失败: {}", totals.navigation_failures);
    info!("⚠️ 格式错误: {}", totals.malformed_rows);
    info!("💾 写入失败: {}", totals.persist_failures);
    for abandoned in &report.abandoned {
        error!(
            "❌ 放弃区间 {} (尝试 {} 次): {}",
            abandoned.range, abandoned.attempts, abandoned.last_failure
        );
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
