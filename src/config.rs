use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 未指定 `--config` 时尝试读取的配置文件
pub const DEFAULT_CONFIG_FILE: &str = "crawler.toml";

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 数据集路径（每行 `rank,url`）
    pub dataset_path: PathBuf,
    /// SQLite 数据库文件
    pub database_path: PathBuf,
    /// 最大 worker 进程数，不设置则取 CPU 并行度
    pub max_workers: Option<usize>,
    /// load 事件之后的静默等待时间（毫秒）
    pub settle_ms: u64,
    /// 等待 load 事件的最长时间（毫秒）
    pub navigation_timeout_ms: u64,
    /// 单个区间最多尝试次数
    pub max_range_attempts: u32,
    /// 重试退避基数（毫秒），实际等待 = 基数 × 已尝试次数
    pub retry_backoff_ms: u64,
    /// 是否无头模式
    pub headless: bool,
    /// 浏览器可执行文件路径，不设置则由 chromiumoxide 自动查找
    pub chrome_executable: Option<PathBuf>,
    /// 连接已有浏览器的调试端口，设置后不再自行启动浏览器
    pub browser_debug_port: Option<u16>,
    /// 是否禁用网络缓存
    pub disable_cache: bool,
    /// worker 日志目录
    pub log_dir: PathBuf,
    /// 默认日志级别（RUST_LOG 优先）
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("top-1m.csv"),
            database_path: PathBuf::from("captures.sqlite"),
            max_workers: None,
            settle_ms: 5000,
            navigation_timeout_ms: 30_000,
            max_range_attempts: 5,
            retry_backoff_ms: 1000,
            headless: true,
            chrome_executable: None,
            browser_debug_port: None,
            disable_cache: true,
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// 按 默认值 → TOML 文件 → 环境变量 的顺序加载配置
    ///
    /// `path` 为 `None` 时，仅当当前目录存在 `crawler.toml` 才读取。
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(p) => Self::from_toml_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_toml_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        let config = base.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件读取配置，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    /// 使用 `CRAWLER_*` 环境变量覆盖配置
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("CRAWLER_DATASET_PATH") {
            self.dataset_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CRAWLER_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("CRAWLER_MAX_WORKERS") {
            self.max_workers = Some(parse_env("CRAWLER_MAX_WORKERS", &v, "usize")?);
        }
        if let Some(v) = lookup("CRAWLER_SETTLE_MS") {
            self.settle_ms = parse_env("CRAWLER_SETTLE_MS", &v, "u64")?;
        }
        if let Some(v) = lookup("CRAWLER_NAVIGATION_TIMEOUT_MS") {
            self.navigation_timeout_ms = parse_env("CRAWLER_NAVIGATION_TIMEOUT_MS", &v, "u64")?;
        }
        if let Some(v) = lookup("CRAWLER_MAX_RANGE_ATTEMPTS") {
            self.max_range_attempts = parse_env("CRAWLER_MAX_RANGE_ATTEMPTS", &v, "u32")?;
        }
        if let Some(v) = lookup("CRAWLER_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = parse_env("CRAWLER_RETRY_BACKOFF_MS", &v, "u64")?;
        }
        if let Some(v) = lookup("CRAWLER_HEADLESS") {
            self.headless = parse_env("CRAWLER_HEADLESS", &v, "bool")?;
        }
        if let Some(v) = lookup("CRAWLER_CHROME_EXECUTABLE") {
            self.chrome_executable = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("CRAWLER_BROWSER_DEBUG_PORT") {
            self.browser_debug_port = Some(parse_env("CRAWLER_BROWSER_DEBUG_PORT", &v, "u16")?);
        }
        if let Some(v) = lookup("CRAWLER_DISABLE_CACHE") {
            self.disable_cache = parse_env("CRAWLER_DISABLE_CACHE", &v, "bool")?;
        }
        if let Some(v) = lookup("CRAWLER_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CRAWLER_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(self)
    }

    /// 检查配置值是否合法
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_range_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "max_range_attempts".to_string(),
                reason: "至少需要尝试 1 次".to_string(),
            });
        }
        if self.max_workers == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max_workers".to_string(),
                reason: "worker 数量必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    /// 第 `attempt` 次失败后的重试等待时间
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

fn parse_env<T: std::str::FromStr>(
    var_name: &str,
    value: &str,
    expected_type: &str,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvVarParseFailed {
            var_name: var_name.to_string(),
            value: value.to_string(),
            expected_type: expected_type.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            dataset_path = "alexa.csv"
            settle_ms = 250
            browser_debug_port = 9222
            "#,
            Path::new("inline.toml"),
        )
        .unwrap();

        assert_eq!(config.dataset_path, PathBuf::from("alexa.csv"));
        assert_eq!(config.settle_ms, 250);
        assert_eq!(config.browser_debug_port, Some(9222));
        assert_eq!(config.navigation_timeout_ms, 30_000);
        assert_eq!(config.max_range_attempts, 5);
        assert!(config.headless);
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let env: HashMap<&str, &str> = [
            ("CRAWLER_MAX_WORKERS", "3"),
            ("CRAWLER_HEADLESS", "false"),
            ("CRAWLER_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_workers, Some(3));
        assert!(!config.headless);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let err = Config::default()
            .with_overrides_from(|k| (k == "CRAWLER_SETTLE_MS").then(|| "soon".to_string()))
            .unwrap_err();

        match err {
            ConfigError::EnvVarParseFailed { var_name, value, .. } => {
                assert_eq!(var_name, "CRAWLER_SETTLE_MS");
                assert_eq!(value, "soon");
            }
            other => panic!("意外的错误: {other}"),
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = Config {
            max_range_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_linearly() {
        let config = Config {
            retry_backoff_ms: 200,
            ..Config::default()
        };
        assert_eq!(config.retry_backoff(1), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(600));
    }
}
