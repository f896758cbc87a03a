//! 主进程与 worker 之间的消息
//!
//! 每行一个 JSON 对象，`type` 字段区分消息类型。
//! 任务从子进程 stdin 下发，汇报走子进程 stdout；worker 日志从不写 stdout。

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::error::IpcError;
use crate::models::WorkRange;
use crate::orchestrator::range_worker::RangeSummary;

/// 主进程 → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MasterMessage {
    #[serde(rename_all = "camelCase")]
    Scrape {
        start_line: u64,
        end_line: u64,
        dataset_path: PathBuf,
    },
}

impl MasterMessage {
    pub fn scrape(range: &WorkRange) -> Self {
        MasterMessage::Scrape {
            start_line: range.start_line,
            end_line: range.end_line,
            dataset_path: range.dataset_path.clone(),
        }
    }

    pub fn into_range(self) -> WorkRange {
        match self {
            MasterMessage::Scrape {
                start_line,
                end_line,
                dataset_path,
            } => WorkRange::new(dataset_path, start_line, end_line),
        }
    }
}

/// worker → 主进程
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// 进程已启动，开始初始化浏览器
    Online { pid: u32 },
    /// 整段处理完毕
    #[serde(rename_all = "camelCase")]
    Done {
        start_line: u64,
        end_line: u64,
        summary: RangeSummary,
    },
    /// 初始化失败，整段需要重试
    #[serde(rename_all = "camelCase")]
    Fail {
        start_line: u64,
        end_line: u64,
        reason: String,
    },
}

impl WorkerMessage {
    pub fn done(range: &WorkRange, summary: RangeSummary) -> Self {
        WorkerMessage::Done {
            start_line: range.start_line,
            end_line: range.end_line,
            summary,
        }
    }

    pub fn fail(range: &WorkRange, reason: impl Into<String>) -> Self {
        WorkerMessage::Fail {
            start_line: range.start_line,
            end_line: range.end_line,
            reason: reason.into(),
        }
    }
}

/// 写一条消息并立即 flush
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// 读下一条消息，跳过空行；对端关闭时返回 `None`
pub async fn read_message<R, M>(lines: &mut Lines<R>) -> Result<Option<M>, IpcError>
where
    R: AsyncBufRead + Unpin,
    M: DeserializeOwned,
{
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(line)?));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn test_scrape_wire_format() {
        let message = MasterMessage::scrape(&WorkRange::new("top-1m.csv", 6, 9));
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "scrape",
                "startLine": 6,
                "endLine": 9,
                "datasetPath": "top-1m.csv"
            })
        );
    }

    #[test]
    fn test_fail_wire_format() {
        let message = WorkerMessage::fail(&WorkRange::new("d.csv", 0, 4), "浏览器启动失败");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "fail",
                "startLine": 0,
                "endLine": 4,
                "reason": "浏览器启动失败"
            })
        );
    }

    #[tokio::test]
    async fn test_messages_over_a_pipe() {
        let (mut worker_end, master_end) = tokio::io::duplex(1024);

        let range = WorkRange::new("d.csv", 2, 3);
        write_message(&mut worker_end, &WorkerMessage::Online { pid: 42 })
            .await
            .unwrap();
        write_message(&mut worker_end, &WorkerMessage::done(&range, RangeSummary::default()))
            .await
            .unwrap();
        drop(worker_end);

        let mut lines = BufReader::new(master_end).lines();
        let first: Option<WorkerMessage> = read_message(&mut lines).await.unwrap();
        assert_eq!(first, Some(WorkerMessage::Online { pid: 42 }));
        let second: Option<WorkerMessage> = read_message(&mut lines).await.unwrap();
        assert!(matches!(second, Some(WorkerMessage::Done { start_line: 2, end_line: 3, .. })));
    }

    #[tokio::test]
    async fn test_garbage_line_is_a_codec_error() {
        let input: &[u8] = b"\nnot json\n";
        let mut lines = BufReader::new(input).lines();
        let result: Result<Option<WorkerMessage>, _> = read_message(&mut lines).await;
        assert!(matches!(result, Err(IpcError::Codec(_))));
    }
}
