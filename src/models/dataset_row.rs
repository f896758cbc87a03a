use serde::Deserialize;

use crate::error::DatasetError;

/// 数据集中的一行：`rank,url`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetRow {
    pub rank: u64,
    pub url: String,
}

impl DatasetRow {
    /// 解析一行 `rank,url`（无表头，支持带引号的 url）
    pub fn parse(line_index: u64, line: &str) -> Result<Self, DatasetError> {
        let malformed = |reason: String| DatasetError::MalformedRow {
            line: line_index,
            reason,
        };

        if line.trim().is_empty() {
            return Err(malformed("空行".to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(line.as_bytes());

        let row: DatasetRow = match reader.deserialize().next() {
            Some(Ok(row)) => row,
            Some(Err(e)) => return Err(malformed(e.to_string())),
            None => return Err(malformed("空行".to_string())),
        };

        if row.url.is_empty() {
            return Err(malformed("缺少 url".to_string()));
        }
        Ok(row)
    }

    /// 数据集里的 url 常常不带协议，补上 `http://`
    pub fn navigable_url(&self) -> String {
        if self.url.contains("://") || self.url.starts_with("about:") {
            self.url.clone()
        } else {
            format!("http://{}", self.url)
        }
    }
}
