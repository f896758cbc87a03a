//! 数据集分片
//!
//! 把 `[0, total_lines-1]` 切成 `worker_count` 段连续闭区间：
//! 前面每段 `floor(total / count)` 行，最后一段带走余数。
//! 纯函数，失败 worker 的区间随时可以按 `(total, count, i)` 重算。

use std::path::Path;

use thiserror::Error;

use crate::models::WorkRange;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("worker 数量必须大于 0")]
    NoWorkers,
    #[error("worker 数量 ({workers}) 超过数据行数 ({lines})")]
    TooManyWorkers { lines: u64, workers: usize },
    #[error("第 {index} 个 worker 分不到任何行 (共 {lines} 行, {workers} 个 worker)")]
    EmptySlice {
        index: usize,
        lines: u64,
        workers: usize,
    },
}

/// 第 `index` 个 worker 的区间
pub fn slice_for(
    dataset: &Path,
    total_lines: u64,
    worker_count: usize,
    index: usize,
) -> Result<WorkRange, PartitionError> {
    if worker_count == 0 {
        return Err(PartitionError::NoWorkers);
    }
    let workers = worker_count as u64;
    let slice_size = total_lines / workers;
    let is_last = index + 1 == worker_count;

    if slice_size == 0 || index >= worker_count {
        return Err(PartitionError::EmptySlice {
            index,
            lines: total_lines,
            workers: worker_count,
        });
    }

    let start = index as u64 * slice_size;
    let end = if is_last {
        total_lines - 1
    } else {
        start + slice_size - 1
    };
    Ok(WorkRange::new(dataset, start, end))
}

/// 切分整个数据集
pub fn partition(
    dataset: &Path,
    total_lines: u64,
    worker_count: usize,
) -> Result<Vec<WorkRange>, PartitionError> {
    if worker_count == 0 {
        return Err(PartitionError::NoWorkers);
    }
    if worker_count as u64 > total_lines {
        return Err(PartitionError::TooManyWorkers {
            lines: total_lines,
            workers: worker_count,
        });
    }
    (0..worker_count)
        .map(|i| slice_for(dataset, total_lines, worker_count, i))
        .collect()
}

/// 只切分从 `first_line` 开始的 `line_count` 行
pub fn partition_span(
    dataset: &Path,
    first_line: u64,
    line_count: u64,
    worker_count: usize,
) -> Result<Vec<WorkRange>, PartitionError> {
    Ok(partition(dataset, line_count, worker_count)?
        .into_iter()
        .map(|range| range.offset(first_line))
        .collect())
}
