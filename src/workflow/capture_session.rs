//! 抓取会话 - 流程层
//!
//! 核心职责：把一个 URL 从导航驱动到定稿，得到一条 `CaptureRecord`
//!
//! 状态顺序：
//! 1. Idle → Navigating：复位页面，开启新的邮箱代号，发起导航
//! 2. Navigating → LoadFired：收到 load 事件
//! 3. LoadFired → Settling：取 HTML 快照，开始静默计时
//! 4. Settling → Finalized：计时结束，封存记录
//!
//! 导航失败或超时时直接从 Navigating 进入 Finalized，记录保留已缓冲的部分事件。

use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::browser::{BrowserEvent, Mailbox, PageTransport};
use crate::config::Config;
use crate::error::BrowserError;
use crate::models::{CaptureRecord, RequestArtifact, ScriptArtifact, ScriptMeta};
use crate::workflow::capture_ctx::CaptureCtx;

/// 页面抓取状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Navigating,
    LoadFired,
    Settling,
    Finalized,
}

impl CaptureState {
    /// 是否允许从当前状态进入 `next`
    pub fn can_advance_to(self, next: CaptureState) -> bool {
        use CaptureState::*;
        matches!(
            (self, next),
            (Idle, Navigating)
                | (Navigating, LoadFired)
                | (Navigating, Finalized)
                | (LoadFired, Settling)
                | (Settling, Finalized)
        )
    }
}

/// 抓取会话错误
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("非法状态转换: {from:?} → {to:?}")]
    InvalidTransition { from: CaptureState, to: CaptureState },
}

/// 会话时间参数
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    /// load 之后的静默窗口
    pub settle: Duration,
    /// 等待 load 的上限
    pub navigation_timeout: Duration,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle: config.settle(),
            navigation_timeout: config.navigation_timeout(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(5000),
            navigation_timeout: Duration::from_secs(30),
        }
    }
}

/// 会话结果
#[derive(Debug)]
pub struct CaptureOutcome {
    /// 已封存的记录（失败时为部分数据）
    pub record: CaptureRecord,
    /// 行级错误：导航失败、超时或 HTML 快照失败
    pub failure: Option<BrowserError>,
    /// 定稿时仍未返回、被放弃的源码请求数
    pub abandoned_fetches: usize,
}

impl CaptureOutcome {
    pub fn is_clean(&self) -> bool {
        self.failure.is_none()
    }
}

enum NextEvent {
    Event(BrowserEvent),
    Deadline,
    Closed,
}

/// 单个 URL 的抓取会话
///
/// 会话存活期间独占邮箱，记录只由本会话写入。
pub struct CaptureSession<'a, T: PageTransport> {
    transport: &'a T,
    mailbox: &'a mut Mailbox,
    settings: CaptureSettings,
    ctx: CaptureCtx,
    state: CaptureState,
    generation: u64,
    record: CaptureRecord,
    navigation_started: Instant,
    pending_fetches: usize,
}

impl<'a, T: PageTransport> CaptureSession<'a, T> {
    pub fn new(
        transport: &'a T,
        mailbox: &'a mut Mailbox,
        settings: CaptureSettings,
        ctx: CaptureCtx,
    ) -> Self {
        let record = CaptureRecord::new(ctx.rank, ctx.url.clone());
        Self {
            transport,
            mailbox,
            settings,
            ctx,
            state: CaptureState::Idle,
            generation: 0,
            record,
            navigation_started: Instant::now(),
            pending_fetches: 0,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    fn advance(&mut self, next: CaptureState) -> Result<(), CaptureError> {
        if !self.state.can_advance_to(next) {
            return Err(CaptureError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!("{} 状态: {:?} → {:?}", self.ctx, self.state, next);
        self.state = next;
        Ok(())
    }

    /// 运行会话直到定稿
    pub async fn run(mut self) -> Result<CaptureOutcome, CaptureError> {
        // 先让上一页面安静下来，再清空邮箱
        let reset = self.transport.reset().await;
        self.generation = self.mailbox.begin_session();
        self.advance(CaptureState::Navigating)?;
        self.navigation_started = Instant::now();
        let deadline = self.navigation_started + self.settings.navigation_timeout;

        if let Err(e) = reset {
            return self.fail(e);
        }

        info!("{} 🌐 开始导航: {}", self.ctx, self.ctx.url);

        let url = self.ctx.url.clone();
        match timeout_at(deadline, self.transport.navigate(&url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.fail(e),
            Err(_) => {
                let error = self.navigation_timeout_error();
                return self.fail(error);
            }
        }

        // 等待 load，期间到达的事件照常缓冲
        loop {
            match self.next_event_until(deadline).await {
                NextEvent::Event(event) => {
                    if self.handle_event(event) {
                        break;
                    }
                }
                NextEvent::Deadline => {
                    let error = self.navigation_timeout_error();
                    return self.fail(error);
                }
                NextEvent::Closed => return self.fail(BrowserError::EventChannelClosed),
            }
        }

        self.advance(CaptureState::LoadFired)?;
        debug!(
            "{} load 事件已触发 ({:.0} ms)",
            self.ctx,
            millis_since(self.navigation_started, Instant::now())
        );

        let mut failure = None;
        match self.transport.snapshot_html().await {
            Ok(html) => self.record.final_html = html,
            Err(e) => {
                warn!("{} ⚠️ 获取页面 HTML 失败: {}", self.ctx, e);
                failure = Some(e);
            }
        }

        self.advance(CaptureState::Settling)?;
        let settle_deadline = Instant::now() + self.settings.settle;
        loop {
            match self.next_event_until(settle_deadline).await {
                NextEvent::Event(event) => {
                    self.handle_event(event);
                }
                NextEvent::Deadline | NextEvent::Closed => break,
            }
        }

        self.finalize(failure)
    }

    async fn next_event_until(&mut self, deadline: Instant) -> NextEvent {
        match timeout_at(deadline, self.mailbox.recv()).await {
            Ok(Some(event)) => NextEvent::Event(event),
            Ok(None) => NextEvent::Closed,
            Err(_) => NextEvent::Deadline,
        }
    }

    /// 处理一个事件，返回是否为本次导航的 load 事件
    fn handle_event(&mut self, event: BrowserEvent) -> bool {
        match event {
            BrowserEvent::RequestSent { url, received_at } => {
                self.record_request(url, received_at);
                false
            }
            BrowserEvent::ScriptParsed(meta) => {
                self.request_source(meta, false);
                false
            }
            BrowserEvent::ScriptFailedToParse(meta) => {
                self.request_source(meta, true);
                false
            }
            BrowserEvent::LoadFired => {
                if self.state != CaptureState::Navigating {
                    debug!("{} 忽略重复的 load 事件", self.ctx);
                }
                self.state == CaptureState::Navigating
            }
            BrowserEvent::SourceFetched {
                generation,
                meta,
                failed_to_parse,
                source,
            } => {
                self.accept_source(generation, meta, failed_to_parse, source);
                false
            }
        }
    }

    fn record_request(&mut self, url: String, received_at: Instant) {
        let time_from_page_load = millis_since(self.navigation_started, received_at);
        self.record.requests.push(RequestArtifact {
            url,
            time_from_page_load,
        });
    }

    /// 异步获取脚本源码，结果带着本会话代号回到邮箱
    fn request_source(&mut self, meta: ScriptMeta, failed_to_parse: bool) {
        if self.record.has_script(&meta.script_id) {
            return;
        }

        let fetch = self.transport.fetch_script_source(meta.script_id.clone());
        let tx = self.mailbox.sender();
        let generation = self.generation;
        self.pending_fetches += 1;

        tokio::spawn(async move {
            let source = fetch.await;
            // 会话已结束时邮箱仍在，发送失败只可能是 worker 正在退出
            let _ = tx.send(BrowserEvent::SourceFetched {
                generation,
                meta,
                failed_to_parse,
                source,
            });
        });
    }

    fn accept_source(
        &mut self,
        generation: u64,
        meta: ScriptMeta,
        failed_to_parse: bool,
        source: Result<String, BrowserError>,
    ) {
        if generation != self.generation {
            debug!(
                "{} 丢弃过期会话 #{} 的脚本源码: {}",
                self.ctx, generation, meta.script_id
            );
            return;
        }
        self.pending_fetches = self.pending_fetches.saturating_sub(1);

        match source {
            Ok(source) => {
                if !self.record.has_script(&meta.script_id) {
                    self.record
                        .scripts
                        .push(ScriptArtifact::from_meta(meta, failed_to_parse, source));
                }
            }
            Err(e) => debug!("{} 脚本源码不可用，跳过: {}", self.ctx, e),
        }
    }

    fn navigation_timeout_error(&self) -> BrowserError {
        BrowserError::NavigationFailed {
            url: self.ctx.url.clone(),
            reason: format!(
                "{} ms 内未触发 load 事件",
                self.settings.navigation_timeout.as_millis()
            ),
        }
    }

    fn fail(mut self, error: BrowserError) -> Result<CaptureOutcome, CaptureError> {
        warn!("{} ⚠️ 导航失败，保留部分数据: {}", self.ctx, error);
        self.record.final_html.clear();
        self.finalize(Some(error))
    }

    fn finalize(mut self, failure: Option<BrowserError>) -> Result<CaptureOutcome, CaptureError> {
        self.advance(CaptureState::Finalized)?;

        if self.pending_fetches > 0 {
            debug!(
                "{} 放弃 {} 个未返回的源码请求",
                self.ctx, self.pending_fetches
            );
        }
        info!(
            "{} ✓ 抓取结束: 脚本 {} 个, 请求 {} 个",
            self.ctx,
            self.record.scripts.len(),
            self.record.requests.len()
        );

        Ok(CaptureOutcome {
            record: self.record,
            failure,
            abandoned_fetches: self.pending_fetches,
        })
    }
}

/// `at` 相对 `start` 的毫秒数，`at` 更早时为负
fn millis_since(start: Instant, at: Instant) -> f64 {
    if at >= start {
        (at - start).as_secs_f64() * 1000.0
    } else {
        -((start - at).as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::scripted::{script, ScriptedEvent, ScriptedPage, ScriptedTransport};

    const URL: &str = "http://example.com";

    fn settings() -> CaptureSettings {
        CaptureSettings {
            settle: Duration::from_millis(5000),
            navigation_timeout: Duration::from_millis(30_000),
        }
    }

    fn ctx(rank: u64, url: &str) -> CaptureCtx {
        CaptureCtx::new(rank - 1, rank, url)
    }

    #[test]
    fn test_state_transitions() {
        use CaptureState::*;
        assert!(Idle.can_advance_to(Navigating));
        assert!(Navigating.can_advance_to(LoadFired));
        assert!(Navigating.can_advance_to(Finalized));
        assert!(LoadFired.can_advance_to(Settling));
        assert!(Settling.can_advance_to(Finalized));

        assert!(!Idle.can_advance_to(Settling));
        assert!(!LoadFired.can_advance_to(Finalized));
        assert!(!Finalized.can_advance_to(Navigating));
        assert!(!Settling.can_advance_to(LoadFired));
    }

    #[test]
    fn test_millis_since_is_signed() {
        let start = Instant::now();
        let later = start + Duration::from_millis(250);
        assert_eq!(millis_since(start, later), 250.0);
        assert_eq!(millis_since(later, start), -250.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_collects_scripts_and_requests() {
        let mut mailbox = Mailbox::new();
        let page = ScriptedPage::loaded("<html><body>hi</body></html>")
            .at(0, ScriptedEvent::Request("http://example.com/".to_string()))
            .at(10, ScriptedEvent::Parsed(script("S1")))
            .at(20, ScriptedEvent::Failed(script("S2")))
            .at(300, ScriptedEvent::Request("http://example.com/late.js".to_string()))
            .at(1000, ScriptedEvent::Parsed(script("S3")));
        let transport = ScriptedTransport::new(mailbox.sender())
            .page(URL, page)
            .source("S1", Some("console.log(1)"), 0)
            .source("S2", Some("function ("), 0)
            .source("S3", Some("var late = true;"), 50);

        let outcome = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(1, URL))
            .run()
            .await
            .unwrap();

        assert!(outcome.is_clean());
        let record = outcome.record;
        assert_eq!(record.rank, 1);
        assert_eq!(record.final_html, "<html><body>hi</body></html>");
        assert_eq!(record.requests.len(), 2);

        let s1 = record.scripts.iter().find(|s| s.script_id == "S1").unwrap();
        assert!(!s1.failed_to_parse);
        assert!(!s1.source.is_empty());
        assert_eq!(s1.hash, "hash-S1");

        let s2 = record.scripts.iter().find(|s| s.script_id == "S2").unwrap();
        assert!(s2.failed_to_parse);

        assert!(record.scripts.iter().any(|s| s.script_id == "S3"));
        assert_eq!(outcome.abandoned_fetches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_time_measured_from_navigation_start() {
        let mut mailbox = Mailbox::new();
        let page = ScriptedPage::loaded("<html></html>")
            .at(120, ScriptedEvent::Request("http://example.com/a.png".to_string()));
        let transport = ScriptedTransport::new(mailbox.sender()).page(URL, page);

        let outcome = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(1, URL))
            .run()
            .await
            .unwrap();

        let request = &outcome.record.requests[0];
        assert!((request.time_from_page_load - 120.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_before_late_load_is_timed_from_navigation() {
        let mut mailbox = Mailbox::new();
        let page = ScriptedPage {
            fail_navigation: false,
            timeline: Vec::new(),
            html: Some("<html></html>".to_string()),
        }
        .at(50, ScriptedEvent::Request("http://example.com/early.js".to_string()))
        .at(400, ScriptedEvent::Load)
        .at(900, ScriptedEvent::Request("http://example.com/late.png".to_string()));
        let transport = ScriptedTransport::new(mailbox.sender()).page(URL, page);

        let outcome = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(1, URL))
            .run()
            .await
            .unwrap();

        // 以导航开始计时，不是以 load 计时：load 之前的请求仍为正的小值
        let times: Vec<f64> = outcome
            .record
            .requests
            .iter()
            .map(|r| r.time_from_page_load)
            .collect();
        assert_eq!(times.len(), 2);
        assert!((times[0] - 50.0).abs() < 1.0);
        assert!((times[1] - 900.0).abs() < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_script_is_dropped() {
        let mut mailbox = Mailbox::new();
        let page = ScriptedPage::loaded("<html></html>")
            .at(5, ScriptedEvent::Parsed(script("gone")))
            .at(6, ScriptedEvent::Parsed(script("kept")));
        let transport = ScriptedTransport::new(mailbox.sender())
            .page(URL, page)
            .source("gone", None, 0)
            .source("kept", Some("1 + 1"), 0);

        let outcome = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(1, URL))
            .run()
            .await
            .unwrap();

        let ids: Vec<_> = outcome
            .record
            .scripts
            .iter()
            .map(|s| s.script_id.as_str())
            .collect();
        assert_eq!(ids, vec!["kept"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_finalizes_with_placeholder() {
        let mut mailbox = Mailbox::new();
        let transport =
            ScriptedTransport::new(mailbox.sender()).page(URL, ScriptedPage::failing());

        let outcome = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(7, URL))
            .run()
            .await
            .unwrap();

        assert!(matches!(
            outcome.failure,
            Some(BrowserError::NavigationFailed { .. })
        ));
        assert_eq!(outcome.record.rank, 7);
        assert!(outcome.record.final_html.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_load_times_out_with_partial_data() {
        let mut mailbox = Mailbox::new();
        let page = ScriptedPage::default()
            .at(10, ScriptedEvent::Request("http://example.com/".to_string()));
        let transport = ScriptedTransport::new(mailbox.sender()).page(URL, page);

        let outcome = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(3, URL))
            .run()
            .await
            .unwrap();

        assert!(matches!(
            outcome.failure,
            Some(BrowserError::NavigationFailed { .. })
        ));
        assert_eq!(outcome.record.requests.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_failure_still_settles() {
        let mut mailbox = Mailbox::new();
        let page = ScriptedPage {
            html: None,
            ..ScriptedPage::loaded("")
        }
        .at(2000, ScriptedEvent::Request("http://example.com/beacon".to_string()));
        let transport = ScriptedTransport::new(mailbox.sender()).page(URL, page);

        let outcome = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(2, URL))
            .run()
            .await
            .unwrap();

        assert!(outcome.failure.is_some());
        assert!(outcome.record.final_html.is_empty());
        assert_eq!(outcome.record.requests.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_source_never_leaks_into_next_session() {
        let mut mailbox = Mailbox::new();
        let first = "http://first.example";
        let second = "http://second.example";
        let transport = ScriptedTransport::new(mailbox.sender())
            .page(
                first,
                ScriptedPage::loaded("<html>1</html>").at(1, ScriptedEvent::Parsed(script("slow"))),
            )
            .page(second, ScriptedPage::loaded("<html>2</html>"))
            // 第一个会话 5 秒后定稿，源码 6 秒后才返回
            .source("slow", Some("var slow;"), 6000);

        let first_outcome =
            CaptureSession::new(&transport, &mut mailbox, settings(), ctx(1, first))
                .run()
                .await
                .unwrap();
        assert!(first_outcome.record.scripts.is_empty());
        assert_eq!(first_outcome.abandoned_fetches, 1);

        let second_outcome =
            CaptureSession::new(&transport, &mut mailbox, settings(), ctx(2, second))
                .run()
                .await
                .unwrap();
        assert!(second_outcome.record.scripts.is_empty());
        assert_eq!(second_outcome.record.final_html, "<html>2</html>");
        assert_eq!(transport.navigations(), vec![first, second]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_previous_page_events_never_reach_next_session() {
        let mut mailbox = Mailbox::new();
        let slow = "http://slow.example";
        let next = "http://next.example";
        // 第一个页面 30 秒内没有 load，超时后才陆续产生脚本和 load
        let slow_page = ScriptedPage {
            fail_navigation: false,
            timeline: Vec::new(),
            html: Some("<html>slow</html>".to_string()),
        }
        .at(30_500, ScriptedEvent::Parsed(script("old-page")))
        .at(31_000, ScriptedEvent::Load);
        let next_page = ScriptedPage {
            fail_navigation: false,
            timeline: Vec::new(),
            html: Some("<html>next</html>".to_string()),
        }
        .at(20_000, ScriptedEvent::Load);
        let transport = ScriptedTransport::new(mailbox.sender())
            .page(slow, slow_page)
            .page(next, next_page)
            .source("old-page", Some("var fromFirstPage;"), 0);

        let first = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(1, slow))
            .run()
            .await
            .unwrap();
        assert!(first.failure.is_some());

        let started = Instant::now();
        let second = CaptureSession::new(&transport, &mut mailbox, settings(), ctx(2, next))
            .run()
            .await
            .unwrap();

        // 用的是自己的 load：20 秒 + 5 秒静默
        assert!(started.elapsed() >= Duration::from_millis(25_000));
        assert!(second.failure.is_none());
        assert!(second.record.scripts.is_empty());
        assert_eq!(second.record.final_html, "<html>next</html>");
    }
}
