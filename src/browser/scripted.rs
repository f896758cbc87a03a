//! 测试用的脚本化传输层
//!
//! 按预设时间线投递事件，用于在没有浏览器的情况下驱动抓取会话和 worker 循环。

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::browser::events::{BrowserEvent, EventSender};
use crate::browser::transport::PageTransport;
use crate::error::BrowserError;
use crate::models::ScriptMeta;

#[derive(Debug, Clone)]
pub enum ScriptedEvent {
    Request(String),
    Parsed(ScriptMeta),
    Failed(ScriptMeta),
    Load,
}

/// 一个页面的预设行为
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    pub fail_navigation: bool,
    /// (距导航开始的延迟, 事件)
    pub timeline: Vec<(Duration, ScriptedEvent)>,
    /// `None` 表示取 HTML 失败
    pub html: Option<String>,
}

impl ScriptedPage {
    /// 立即触发 load 的普通页面
    pub fn loaded(html: &str) -> Self {
        Self {
            fail_navigation: false,
            timeline: vec![(Duration::ZERO, ScriptedEvent::Load)],
            html: Some(html.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_navigation: true,
            ..Self::default()
        }
    }

    pub fn at(mut self, delay_ms: u64, event: ScriptedEvent) -> Self {
        self.timeline.push((Duration::from_millis(delay_ms), event));
        self
    }
}

#[derive(Debug, Clone)]
struct ScriptedSource {
    text: Option<String>,
    delay: Duration,
}

pub struct ScriptedTransport {
    tx: EventSender,
    pages: HashMap<String, ScriptedPage>,
    sources: Arc<Mutex<HashMap<String, ScriptedSource>>>,
    current: Mutex<Option<String>>,
    navigations: Mutex<Vec<String>>,
    /// 当前页面的事件时间线任务，复位时中止
    timeline: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptedTransport {
    pub fn new(tx: EventSender) -> Self {
        Self {
            tx,
            pages: HashMap::new(),
            sources: Arc::new(Mutex::new(HashMap::new())),
            current: Mutex::new(None),
            navigations: Mutex::new(Vec::new()),
            timeline: Mutex::new(None),
        }
    }

    pub fn page(mut self, url: &str, page: ScriptedPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// 预设脚本源码；`text` 为 `None` 表示脚本已被回收
    pub fn source(self, script_id: &str, text: Option<&str>, delay_ms: u64) -> Self {
        self.sources.lock().unwrap().insert(
            script_id.to_string(),
            ScriptedSource {
                text: text.map(str::to_string),
                delay: Duration::from_millis(delay_ms),
            },
        );
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    fn stop_timeline(&self) {
        if let Some(task) = self.timeline.lock().unwrap().take() {
            task.abort();
        }
    }
}

pub fn script(id: &str) -> ScriptMeta {
    ScriptMeta {
        script_id: id.to_string(),
        url: Some(format!("https://cdn.example.com/{id}.js")),
        start_line: 0,
        start_column: 0,
        end_line: 10,
        end_column: 2,
        hash: format!("hash-{id}"),
    }
}

impl PageTransport for ScriptedTransport {
    fn reset(&self) -> impl Future<Output = Result<(), BrowserError>> + Send {
        self.stop_timeline();
        *self.current.lock().unwrap() = None;
        std::future::ready(Ok(()))
    }

    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), BrowserError>> + Send {
        self.stop_timeline();
        self.navigations.lock().unwrap().push(url.to_string());
        *self.current.lock().unwrap() = Some(url.to_string());

        let page = self.pages.get(url).cloned().unwrap_or_default();
        let result = if page.fail_navigation {
            Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            })
        } else {
            let tx = self.tx.clone();
            let started = Instant::now();
            let task = tokio::spawn(async move {
                let mut timeline = page.timeline;
                timeline.sort_by_key(|(delay, _)| *delay);
                for (delay, event) in timeline {
                    tokio::time::sleep_until(started + delay).await;
                    let event = match event {
                        ScriptedEvent::Request(url) => BrowserEvent::RequestSent {
                            url,
                            received_at: Instant::now(),
                        },
                        ScriptedEvent::Parsed(meta) => BrowserEvent::ScriptParsed(meta),
                        ScriptedEvent::Failed(meta) => BrowserEvent::ScriptFailedToParse(meta),
                        ScriptedEvent::Load => BrowserEvent::LoadFired,
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
            *self.timeline.lock().unwrap() = Some(task);
            Ok(())
        };
        std::future::ready(result)
    }

    fn snapshot_html(&self) -> impl Future<Output = Result<String, BrowserError>> + Send {
        let current = self.current.lock().unwrap().clone().unwrap_or_default();
        let html = self.pages.get(&current).and_then(|p| p.html.clone());
        std::future::ready(html.ok_or_else(|| BrowserError::ScriptExecutionFailed {
            source: "Execution context was destroyed".into(),
        }))
    }

    fn fetch_script_source(
        &self,
        script_id: String,
    ) -> impl Future<Output = Result<String, BrowserError>> + Send + 'static {
        let sources = Arc::clone(&self.sources);
        async move {
            let entry = sources.lock().unwrap().get(&script_id).cloned();
            let entry = entry.unwrap_or(ScriptedSource {
                text: None,
                delay: Duration::ZERO,
            });
            tokio::time::sleep(entry.delay).await;
            entry.text.ok_or(BrowserError::SourceUnavailable {
                script_id,
                reason: "No script for id".to_string(),
            })
        }
    }
}
