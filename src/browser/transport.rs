//! 浏览器传输层
//!
//! `PageTransport` 是抓取会话唯一依赖的浏览器能力：复位、导航、取 HTML 快照、
//! 取脚本源码。事件不经过这里，而是由转发任务投递进 [`Mailbox`]。

use std::future::Future;

use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, SetCacheDisabledParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::js_protocol::debugger::{
    EnableParams as DebuggerEnableParams, GetScriptSourceParams,
};
use chromiumoxide::cdp::js_protocol::runtime::ScriptId;
use chromiumoxide::Browser;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::events::{forward_page_events, EventForwarder, Mailbox};
use crate::browser::{connection, headless};
use crate::config::Config;
use crate::error::BrowserError;
use crate::infrastructure::JsExecutor;

/// 抓取会话所需的浏览器能力
pub trait PageTransport {
    /// 让上一页面停止产生事件，并等它已产生的事件全部进入邮箱
    ///
    /// 会话在开启新代号之前调用，之后邮箱里不会再出现上一页面的事件。
    fn reset(&self) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// 发起导航，不等待 load 事件
    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), BrowserError>> + Send;

    /// 取根元素的 outerHTML
    fn snapshot_html(&self) -> impl Future<Output = Result<String, BrowserError>> + Send;

    /// 获取脚本源码；返回的 future 不借用 transport，可以放进独立任务
    fn fetch_script_source(
        &self,
        script_id: String,
    ) -> impl Future<Output = Result<String, BrowserError>> + Send + 'static;
}

/// 基于 chromiumoxide 的传输层，每个 worker 独占一个
///
/// 通过 [`ChromeTransport::open`] 获取，必须调用 [`ChromeTransport::close`] 释放；
/// 错误路径上被直接 drop 时，也会中止后台任务。
pub struct ChromeTransport {
    browser: Browser,
    executor: JsExecutor,
    handler_task: JoinHandle<()>,
    forwarder: EventForwarder,
    owns_browser: bool,
}

impl ChromeTransport {
    /// 启动（或连接）浏览器，创建页面，开启所需的 DevTools 域并注册事件转发
    ///
    /// 这里的任何错误都属于初始化失败，整段区间需要交给新 worker 重试。
    pub async fn open(config: &Config, mailbox: &Mailbox) -> Result<Self, BrowserError> {
        let (browser, handler_task, owns_browser) = match config.browser_debug_port {
            Some(port) => {
                let (browser, task) = connection::connect_to_browser(port).await?;
                (browser, task, false)
            }
            None => {
                let (browser, task) = headless::launch_browser(config).await?;
                (browser, task, true)
            }
        };

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed {
                source: Box::new(e),
            })?;

        page.execute(NetworkEnableParams::default())
            .await
            .map_err(init_failed)?;
        page.execute(DebuggerEnableParams::default())
            .await
            .map_err(init_failed)?;
        if config.disable_cache {
            page.execute(SetCacheDisabledParams::new(true))
                .await
                .map_err(init_failed)?;
        }

        let forwarder = forward_page_events(&page, mailbox.sender()).await?;
        debug!("事件转发任务已启动");

        info!("✓ 浏览器页面已就绪");
        Ok(Self {
            browser,
            executor: JsExecutor::new(page),
            handler_task,
            forwarder,
            owns_browser,
        })
    }

    /// 释放浏览器资源
    ///
    /// 自行启动的浏览器会被关闭并等待退出；连接的浏览器只关闭本页面。
    pub async fn close(mut self) {
        self.forwarder.abort();

        if self.owns_browser {
            if let Err(e) = self.browser.close().await {
                warn!("关闭浏览器失败: {}", e);
            }
            if let Err(e) = self.browser.wait().await {
                warn!("等待浏览器进程退出失败: {}", e);
            }
        } else if let Err(e) = self.executor.page().clone().close().await {
            warn!("关闭页面失败: {}", e);
        }

        self.handler_task.abort();
        info!("浏览器资源已释放");
    }
}

impl Drop for ChromeTransport {
    fn drop(&mut self) {
        self.forwarder.abort();
        self.handler_task.abort();
    }
}

impl PageTransport for ChromeTransport {
    fn reset(&self) -> impl Future<Output = Result<(), BrowserError>> + Send {
        let page = self.executor.page().clone();
        let flush = self.forwarder.flush();
        async move {
            // 空白页提交后，上一页面的文档已销毁，不会再有新事件
            page.goto("about:blank")
                .await
                .map_err(|e| BrowserError::NavigationFailed {
                    url: "about:blank".to_string(),
                    reason: e.to_string(),
                })?;
            flush.await
        }
    }

    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), BrowserError>> + Send {
        let page = self.executor.page().clone();
        let url = url.to_string();
        async move {
            let response = page
                .execute(NavigateParams::new(url.clone()))
                .await
                .map_err(|e| BrowserError::NavigationFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

            match response.result.error_text.clone() {
                Some(reason) => Err(BrowserError::NavigationFailed { url, reason }),
                None => Ok(()),
            }
        }
    }

    fn snapshot_html(&self) -> impl Future<Output = Result<String, BrowserError>> + Send {
        self.executor.outer_html()
    }

    fn fetch_script_source(
        &self,
        script_id: String,
    ) -> impl Future<Output = Result<String, BrowserError>> + Send + 'static {
        let page = self.executor.page().clone();
        async move {
            let params = GetScriptSourceParams::new(ScriptId::new(script_id.clone()));
            let response =
                page.execute(params)
                    .await
                    .map_err(|e| BrowserError::SourceUnavailable {
                        script_id,
                        reason: e.to_string(),
                    })?;
            Ok(response.result.script_source.clone())
        }
    }
}

fn init_failed(err: chromiumoxide::error::CdpError) -> BrowserError {
    BrowserError::ConfigurationFailed {
        message: err.to_string(),
    }
}
