//! 浏览器事件邮箱
//!
//! DevTools 监听任务把事件投递到同一个邮箱，抓取会话按顺序取出处理。
//! 每个会话开始时邮箱进入新的"代"，旧会话遗留的事件和脚本源码结果
//! 依靠代号识别并丢弃，不会写进新会话的记录。
//!
//! 原始 DevTools 事件本身不带会话身份，所以会话开始前传输层先把页面
//! 复位到空白页，再用 [`EventForwarder::flush`] 确认上一页面的事件都已
//! 进入邮箱，最后由 [`Mailbox::begin_session`] 一并清空。

use std::sync::Arc;

use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::cdp::browser_protocol::page::EventLoadEventFired;
use chromiumoxide::cdp::js_protocol::debugger::{EventScriptFailedToParse, EventScriptParsed};
use chromiumoxide::Page;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::BrowserError;
use crate::models::ScriptMeta;

/// 传输层投递给抓取会话的事件
#[derive(Debug)]
pub enum BrowserEvent {
    /// Network.requestWillBeSent
    RequestSent { url: String, received_at: Instant },
    /// Debugger.scriptParsed
    ScriptParsed(ScriptMeta),
    /// Debugger.scriptFailedToParse
    ScriptFailedToParse(ScriptMeta),
    /// Page.loadEventFired
    LoadFired,
    /// 异步获取脚本源码的结果，带发起时的会话代号
    SourceFetched {
        generation: u64,
        meta: ScriptMeta,
        failed_to_parse: bool,
        source: Result<String, BrowserError>,
    },
}

pub type EventSender = UnboundedSender<BrowserEvent>;

/// worker 独占的事件邮箱
pub struct Mailbox {
    tx: EventSender,
    rx: UnboundedReceiver<BrowserEvent>,
    generation: u64,
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            generation: 0,
        }
    }

    /// 投递端，交给监听任务和源码获取任务
    pub fn sender(&self) -> EventSender {
        self.tx.clone()
    }

    /// 开启新会话：代号加一，并丢弃队列里上一会话遗留的事件
    pub fn begin_session(&mut self) -> u64 {
        self.generation += 1;
        let mut dropped = 0usize;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                "会话 #{} 开始前丢弃了 {} 个过期事件",
                self.generation, dropped
            );
        }
        self.generation
    }

    /// 等待下一个事件
    ///
    /// 邮箱自己持有一个发送端，所以通道不会关闭，这里只会挂起等待。
    pub async fn recv(&mut self) -> Option<BrowserEvent> {
        self.rx.recv().await
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&EventScriptParsed> for ScriptMeta {
    fn from(event: &EventScriptParsed) -> Self {
        Self {
            script_id: event.script_id.inner().clone(),
            url: non_empty(&event.url),
            start_line: event.start_line,
            start_column: event.start_column,
            end_line: event.end_line,
            end_column: event.end_column,
            hash: event.hash.clone(),
        }
    }
}

impl From<&EventScriptFailedToParse> for ScriptMeta {
    fn from(event: &EventScriptFailedToParse) -> Self {
        Self {
            script_id: event.script_id.inner().clone(),
            url: non_empty(&event.url),
            start_line: event.start_line,
            start_column: event.start_column,
            end_line: event.end_line,
            end_column: event.end_column,
            hash: event.hash.clone(),
        }
    }
}

fn non_empty(url: &str) -> Option<String> {
    (!url.is_empty()).then(|| url.to_string())
}

/// 在页面上注册监听，把 DevTools 事件转发进邮箱
pub async fn forward_page_events(
    page: &Page,
    tx: EventSender,
) -> Result<EventForwarder, BrowserError> {
    let requests = page.event_listener::<EventRequestWillBeSent>().await?;
    let parsed = page.event_listener::<EventScriptParsed>().await?;
    let failed = page.event_listener::<EventScriptFailedToParse>().await?;
    let loads = page.event_listener::<EventLoadEventFired>().await?;

    let events = futures::stream::select_all(vec![
        requests
            .map(|event: Arc<EventRequestWillBeSent>| BrowserEvent::RequestSent {
                url: event.request.url.clone(),
                received_at: Instant::now(),
            })
            .boxed(),
        parsed
            .map(|event: Arc<EventScriptParsed>| {
                BrowserEvent::ScriptParsed(ScriptMeta::from(event.as_ref()))
            })
            .boxed(),
        failed
            .map(|event: Arc<EventScriptFailedToParse>| {
                BrowserEvent::ScriptFailedToParse(ScriptMeta::from(event.as_ref()))
            })
            .boxed(),
        loads
            .map(|_: Arc<EventLoadEventFired>| BrowserEvent::LoadFired)
            .boxed(),
    ]);

    Ok(EventForwarder::spawn(events, tx))
}

/// 事件转发任务
///
/// 所有监听流合并进一个任务转发。
pub struct EventForwarder {
    task: JoinHandle<()>,
    flush_tx: UnboundedSender<oneshot::Sender<()>>,
}

impl EventForwarder {
    pub fn spawn<S>(mut events: S, tx: EventSender) -> Self
    where
        S: Stream<Item = BrowserEvent> + Unpin + Send + 'static,
    {
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<oneshot::Sender<()>>();
        let task = tokio::spawn(async move {
            loop {
                // 事件优先：只有监听流都暂时为空时才应答 flush
                let event = tokio::select! {
                    biased;
                    Some(event) = events.next() => event,
                    Some(ack) = flush_rx.recv() => {
                        let _ = ack.send(());
                        continue;
                    }
                    else => break,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Self { task, flush_tx }
    }

    /// 等待已到达监听流的事件全部进入邮箱
    pub async fn flush(&self) -> Result<(), BrowserError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.flush_tx
            .send(ack_tx)
            .map_err(|_| BrowserError::EventChannelClosed)?;
        ack_rx.await.map_err(|_| BrowserError::EventChannelClosed)
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
