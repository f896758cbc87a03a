use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::error::DatasetError;
use crate::models::dataset_row::DatasetRow;

/// 按行号读取的数据集
///
/// 文件只读，多个 worker 进程可以同时按行号读取。
/// 按字节切行，非 UTF-8 的行只影响它自己。
#[derive(Debug, Clone)]
pub struct Dataset {
    path: PathBuf,
}

impl Dataset {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 统计数据集总行数（不解码）
    pub async fn count_lines(&self) -> Result<u64, DatasetError> {
        let mut reader = self.open().await?;
        let mut buf = Vec::new();
        let mut count = 0u64;
        while self.next_raw(&mut reader, &mut buf).await? {
            count += 1;
        }
        Ok(count)
    }

    /// 定位到第 `start_line` 行，返回逐行读取的游标
    pub async fn cursor_at(&self, start_line: u64) -> Result<DatasetCursor, DatasetError> {
        let mut reader = self.open().await?;
        let mut buf = Vec::new();
        let mut skipped = 0u64;
        while skipped < start_line {
            if !self.next_raw(&mut reader, &mut buf).await? {
                break;
            }
            skipped += 1;
        }
        Ok(DatasetCursor {
            dataset: self.clone(),
            reader,
            buf,
            next_line: skipped,
        })
    }

    async fn open(&self) -> Result<BufReader<File>, DatasetError> {
        let file = File::open(&self.path)
            .await
            .map_err(|source| DatasetError::OpenFailed {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(BufReader::new(file))
    }

    /// 读一行原始字节到 `buf`（去掉换行符），文件结束返回 `false`
    async fn next_raw(
        &self,
        reader: &mut BufReader<File>,
        buf: &mut Vec<u8>,
    ) -> Result<bool, DatasetError> {
        buf.clear();
        let read = reader
            .read_until(b'\n', buf)
            .await
            .map_err(|source| DatasetError::ReadFailed {
                path: self.path.display().to_string(),
                source,
            })?;
        if read == 0 {
            return Ok(false);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(true)
    }
}

/// 数据集游标，每次返回 (行号, 解析结果)
pub struct DatasetCursor {
    dataset: Dataset,
    reader: BufReader<File>,
    buf: Vec<u8>,
    next_line: u64,
}

impl DatasetCursor {
    /// 下一个要读取的行号
    pub fn position(&self) -> u64 {
        self.next_line
    }

    /// 读取下一行；文件结束时返回 `Ok(None)`
    ///
    /// 行格式错误（包括非 UTF-8 字节）放在内层 `Result` 中返回，调用方可以跳过该行继续。
    pub async fn next_row(
        &mut self,
    ) -> Result<Option<(u64, Result<DatasetRow, DatasetError>)>, DatasetError> {
        if !self.dataset.next_raw(&mut self.reader, &mut self.buf).await? {
            return Ok(None);
        }

        let index = self.next_line;
        self.next_line += 1;
        let row = match std::str::from_utf8(&self.buf) {
            Ok(text) => DatasetRow::parse(index, text),
            Err(e) => Err(DatasetError::MalformedRow {
                line: index,
                reason: format!("不是合法的 UTF-8: {e}"),
            }),
        };
        Ok(Some((index, row)))
    }
}
