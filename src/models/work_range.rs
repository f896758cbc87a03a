use std::fmt::Display;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 分配给单个 worker 的连续行区间（闭区间，行号从 0 开始）
///
/// 分配后不可变；worker 失败时原样交给替补 worker。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkRange {
    pub dataset_path: PathBuf,
    pub start_line: u64,
    pub end_line: u64,
}

impl WorkRange {
    pub fn new(dataset_path: impl Into<PathBuf>, start_line: u64, end_line: u64) -> Self {
        Self {
            dataset_path: dataset_path.into(),
            start_line,
            end_line,
        }
    }

    /// 区间包含的行数
    pub fn len(&self) -> u64 {
        self.end_line - self.start_line + 1
    }

    /// 整体平移 `base` 行
    pub fn offset(mut self, base: u64) -> Self {
        self.start_line += base;
        self.end_line += base;
        self
    }
}

impl Display for WorkRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start_line, self.end_line)
    }
}
