//! 浏览器层
//!
//! - `headless` / `connection`：启动或连接浏览器
//! - `handler`：后台驱动 DevTools 连接
//! - `transport`：抓取会话使用的浏览器能力（`PageTransport`）
//! - `events`：DevTools 事件邮箱

pub mod connection;
pub mod events;
mod handler;
pub mod headless;
#[cfg(test)]
pub mod scripted;
pub mod transport;

pub use events::{BrowserEvent, EventSender, Mailbox};
pub use transport::{ChromeTransport, PageTransport};
