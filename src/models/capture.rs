use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个 URL 的抓取结果
///
/// 由抓取会话独占写入，定稿后交给存储层，每次处理只提交一次。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub url: String,
    pub rank: u64,
    pub created_at: DateTime<Utc>,
    pub scripts: Vec<ScriptArtifact>,
    pub requests: Vec<RequestArtifact>,
    /// load 之后 `document.documentElement.outerHTML` 的快照，导航失败时为空
    pub final_html: String,
}

impl CaptureRecord {
    /// 创建空记录
    pub fn new(rank: u64, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            rank,
            created_at: Utc::now(),
            scripts: Vec::new(),
            requests: Vec::new(),
            final_html: String::new(),
        }
    }

    /// 是否已记录该脚本（scriptId 仅在本会话内唯一）
    pub fn has_script(&self, script_id: &str) -> bool {
        self.scripts.iter().any(|s| s.script_id == script_id)
    }
}

/// 从存储读回的记录
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCapture {
    pub record: CaptureRecord,
    /// 入库时间（数据库 `CURRENT_TIMESTAMP`，UTC）
    pub stored_at: NaiveDateTime,
}

/// 脚本事件携带的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptMeta {
    pub script_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
    pub hash: String,
}

/// 已解析（或解析失败）的脚本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptArtifact {
    pub script_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub start_line: i64,
    pub start_column: i64,
    pub end_line: i64,
    pub end_column: i64,
    pub hash: String,
    pub failed_to_parse: bool,
    pub source: String,
}

impl ScriptArtifact {
    /// 由脚本元数据和已取回的源码组装
    pub fn from_meta(meta: ScriptMeta, failed_to_parse: bool, source: String) -> Self {
        Self {
            script_id: meta.script_id,
            url: meta.url,
            start_line: meta.start_line,
            start_column: meta.start_column,
            end_line: meta.end_line,
            end_column: meta.end_column,
            hash: meta.hash,
            failed_to_parse,
            source,
        }
    }
}

/// 页面发出的网络请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestArtifact {
    pub url: String,
    /// 距导航开始的毫秒数（单调时钟）
    pub time_from_page_load: f64,
}
