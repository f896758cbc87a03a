//! 行处理上下文
//!
//! 封装"我正在处理数据集的第几行、哪个站点"这一信息

use std::fmt::Display;

use crate::models::DatasetRow;

/// 单行抓取上下文
#[derive(Debug, Clone)]
pub struct CaptureCtx {
    /// 数据集行号（从 0 开始）
    pub line: u64,
    /// 站点排名，记录的主键
    pub rank: u64,
    /// 实际导航的 URL
    pub url: String,
}

impl CaptureCtx {
    pub fn new(line: u64, rank: u64, url: impl Into<String>) -> Self {
        Self {
            line,
            rank,
            url: url.into(),
        }
    }

    /// 由数据集行构建，url 补全协议
    pub fn from_row(line: u64, row: &DatasetRow) -> Self {
        Self::new(line, row.rank, row.navigable_url())
    }
}

impl Display for CaptureCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[行 #{} rank #{}]", self.line, self.rank)
    }
}
