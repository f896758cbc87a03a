use std::fmt::Display;

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 在后台驱动浏览器事件处理器
///
/// 单条消息出错只记日志，处理器流结束（连接断开）时任务才退出。
pub(crate) fn spawn_handler<S, E>(mut handler: S) -> JoinHandle<()>
where
    S: Stream<Item = Result<(), E>> + Unpin + Send + 'static,
    E: Display + Send,
{
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("⚠️ 浏览器事件处理出错: {}", e);
            }
        }
        debug!("浏览器事件处理器已结束");
    })
}
