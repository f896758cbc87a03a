//! 抓取记录存储 - 业务能力层
//!
//! 以 `rank` 为主键的条件插入：同一行被重复处理（worker 崩溃后整段重试）时，
//! 只保留第一次写入的记录，既不覆盖也不重复。
//!
//! 多个 worker 进程写同一个 SQLite 文件，所以使用 WAL 日志模式和忙等待超时。

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::Row;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{CaptureRecord, StoredCapture};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS captures (
    rank        INTEGER PRIMARY KEY,
    url         TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    stored_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    final_html  TEXT NOT NULL,
    scripts     TEXT NOT NULL,
    requests    TEXT NOT NULL
)
"#;

const STORED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 条件插入的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// 新写入
    Inserted,
    /// 该 rank 已有记录，本次未写入
    AlreadyPresent,
}

/// SQLite 存储网关
#[derive(Clone)]
pub struct CaptureStore {
    pool: SqlitePool,
}

impl CaptureStore {
    /// 打开（必要时创建）数据库文件并初始化表结构
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let open_failed = |source| StoreError::OpenFailed {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| open_failed(sqlx::Error::Io(e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(open_failed)?;

        let store = Self { pool };
        store.init_schema().await.map_err(open_failed)?;
        info!("✓ 数据库已打开: {}", path.display());
        Ok(store)
    }

    /// 内存数据库，只有一个常驻连接
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let open_failed = |source| StoreError::OpenFailed {
            path: ":memory:".to_string(),
            source,
        };

        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(open_failed)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(open_failed)?;

        let store = Self { pool };
        store.init_schema().await.map_err(open_failed)?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// 以 rank 为键的原子条件插入，已存在时不做任何修改
    pub async fn upsert_if_absent(
        &self,
        record: &CaptureRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let rank = to_key(record.rank)?;
        let scripts = serde_json::to_string(&record.scripts)?;
        let requests = serde_json::to_string(&record.requests)?;
        let captured_at = record
            .created_at
            .to_rfc3339_opts(SecondsFormat::Nanos, true);

        let result = sqlx::query(
            r#"
            INSERT INTO captures (rank, url, captured_at, final_html, scripts, requests)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(rank) DO NOTHING
            "#,
        )
        .bind(rank)
        .bind(&record.url)
        .bind(captured_at)
        .bind(&record.final_html)
        .bind(scripts)
        .bind(requests)
        .execute(&self.pool)
        .await
        .map_err(|source| StoreError::WriteFailed {
            rank: record.rank,
            source,
        })?;

        if result.rows_affected() == 0 {
            debug!("rank {} 已存在，跳过写入", record.rank);
            Ok(UpsertOutcome::AlreadyPresent)
        } else {
            Ok(UpsertOutcome::Inserted)
        }
    }

    /// 按 rank 读取记录
    pub async fn get(&self, rank: u64) -> Result<Option<StoredCapture>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT rank, url, captured_at, stored_at, final_html, scripts, requests
            FROM captures
            WHERE rank = ?
            "#,
        )
        .bind(to_key(rank)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode_row(&r)).transpose()
    }

    /// 已存储的记录总数
    pub async fn count(&self) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM captures")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_key(rank: u64) -> Result<i64, StoreError> {
    i64::try_from(rank).map_err(|_| StoreError::RankOutOfRange(rank))
}

fn decode_row(row: &SqliteRow) -> Result<StoredCapture, StoreError> {
    let rank: i64 = row.try_get("rank")?;
    let corrupt = |reason: String| StoreError::CorruptRow { rank, reason };

    let captured_at: String = row.try_get("captured_at")?;
    let created_at = DateTime::parse_from_rfc3339(&captured_at)
        .map_err(|e| corrupt(format!("captured_at: {e}")))?
        .with_timezone(&Utc);

    let stored_at: String = row.try_get("stored_at")?;
    let stored_at = NaiveDateTime::parse_from_str(&stored_at, STORED_AT_FORMAT)
        .map_err(|e| corrupt(format!("stored_at: {e}")))?;

    let scripts: String = row.try_get("scripts")?;
    let requests: String = row.try_get("requests")?;

    let record = CaptureRecord {
        url: row.try_get("url")?,
        rank: u64::try_from(rank).map_err(|_| corrupt("负数 rank".to_string()))?,
        created_at,
        scripts: serde_json::from_str(&scripts)?,
        requests: serde_json::from_str(&requests)?,
        final_html: row.try_get("final_html")?,
    };

    Ok(StoredCapture { record, stored_at })
}
