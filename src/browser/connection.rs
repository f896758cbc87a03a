use chromiumoxide::Browser;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::browser::handler::spawn_handler;
use crate::error::BrowserError;

/// 连接到已开启远程调试端口的浏览器
pub async fn connect_to_browser(port: u16) -> Result<(Browser, JoinHandle<()>), BrowserError> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        BrowserError::connection_failed(port, e)
    })?;
    debug!("浏览器连接成功");

    let handler_task = spawn_handler(handler);

    Ok((browser, handler_task))
}
