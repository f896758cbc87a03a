use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] BrowserError),
    /// 数据集读取错误
    #[error("数据集错误: {0}")]
    Dataset(#[from] DatasetError),
    /// 存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 进程间通信错误
    #[error("通信错误: {0}")]
    Ipc(#[from] IpcError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// 是否属于整段致命错误（浏览器/传输层初始化失败）
    ///
    /// 只有这类错误需要整段交还给主进程重试，其余错误都在行内消化。
    pub fn is_range_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Browser(
                BrowserError::LaunchFailed { .. }
                    | BrowserError::ConnectionFailed { .. }
                    | BrowserError::PageCreationFailed { .. }
                    | BrowserError::ConfigurationFailed { .. }
            )
        )
    }
}

/// 浏览器相关错误
#[derive(Debug, Error)]
pub enum BrowserError {
    /// 启动浏览器失败
    #[error("启动浏览器失败: {source}")]
    LaunchFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 连接浏览器失败
    #[error("无法连接到浏览器 (端口: {port}): {source}")]
    ConnectionFailed {
        port: u16,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 创建页面失败
    #[error("创建页面失败: {source}")]
    PageCreationFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 浏览器配置失败
    #[error("浏览器配置失败: {message}")]
    ConfigurationFailed { message: String },
    /// 导航失败
    #[error("导航到 {url} 失败: {reason}")]
    NavigationFailed { url: String, reason: String },
    /// 执行脚本失败
    #[error("执行脚本失败: {source}")]
    ScriptExecutionFailed {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 获取脚本源码失败
    #[error("获取脚本 {script_id} 源码失败: {reason}")]
    SourceUnavailable { script_id: String, reason: String },
    /// 事件通道已关闭
    #[error("浏览器事件通道已关闭")]
    EventChannelClosed,
}

/// 数据集读取错误
#[derive(Debug, Error)]
pub enum DatasetError {
    /// 打开文件失败
    #[error("打开数据集失败 ({path}): {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 读取文件失败
    #[error("读取数据集失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// 行格式错误
    #[error("第 {line} 行格式错误: {reason}")]
    MalformedRow { line: u64, reason: String },
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 打开数据库失败
    #[error("打开数据库失败 ({path}): {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    /// 写入失败
    #[error("写入记录失败 (rank: {rank}): {source}")]
    WriteFailed {
        rank: u64,
        #[source]
        source: sqlx::Error,
    },
    /// 查询失败
    #[error("查询失败: {0}")]
    QueryFailed(#[from] sqlx::Error),
    /// 序列化失败
    #[error("记录序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
    /// rank 超出存储范围
    #[error("rank {0} 超出 SQLite INTEGER 范围")]
    RankOutOfRange(u64),
    /// 读回的行无法还原为记录
    #[error("存储记录损坏 (rank: {rank}): {reason}")]
    CorruptRow { rank: i64, reason: String },
}

/// 进程间通信错误
#[derive(Debug, Error)]
pub enum IpcError {
    /// 消息编码/解码失败
    #[error("消息解析失败: {0}")]
    Codec(#[from] serde_json::Error),
    /// 管道读写失败
    #[error("管道读写失败: {0}")]
    Pipe(#[from] std::io::Error),
    /// 未收到任务分配
    #[error("标准输入已关闭，未收到任务分配")]
    NoAssignment,
    /// 收到意外的消息
    #[error("收到意外的消息: {0}")]
    Unexpected(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 配置值非法
    #[error("配置项 {field} 非法: {reason}")]
    Invalid { field: String, reason: String },
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        BrowserError::ScriptExecutionFailed {
            source: Box::new(err),
        }
    }
}

// ========== 便捷构造函数 ==========

impl BrowserError {
    /// 创建浏览器启动错误
    pub fn launch_failed(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        BrowserError::LaunchFailed {
            source: Box::new(source),
        }
    }

    /// 创建浏览器连接错误
    pub fn connection_failed(
        port: u16,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        BrowserError::ConnectionFailed {
            port,
            source: Box::new(source),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
