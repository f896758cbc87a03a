use chromiumoxide::{Browser, BrowserConfig};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::browser::handler::spawn_handler;
use crate::config::Config;
use crate::error::BrowserError;

/// 启动一个独立的浏览器实例
///
/// 每个 worker 进程使用自己的用户数据目录，避免多个实例抢同一个 profile 锁。
pub async fn launch_browser(config: &Config) -> Result<(Browser, JoinHandle<()>), BrowserError> {
    info!("🚀 启动浏览器 (无头: {})...", config.headless);

    let profile_dir =
        std::env::temp_dir().join(format!("script-crawler-{}", std::process::id()));
    debug!("用户数据目录: {}", profile_dir.display());

    let mut builder = BrowserConfig::builder()
        .user_data_dir(profile_dir)
        .args(vec![
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
            "--mute-audio",
        ]);
    builder = if config.headless {
        builder.new_headless_mode()
    } else {
        builder.with_head()
    };
    if let Some(executable) = &config.chrome_executable {
        builder = builder.chrome_executable(executable);
    }

    let browser_config = builder.build().map_err(|e| {
        error!("配置浏览器失败: {}", e);
        BrowserError::ConfigurationFailed { message: e }
    })?;

    let (browser, handler) = Browser::launch(browser_config).await.map_err(|e| {
        error!("启动浏览器失败: {}", e);
        BrowserError::launch_failed(e)
    })?;
    debug!("浏览器启动成功");

    let handler_task = spawn_handler(handler);

    Ok((browser, handler_task))
}
