//! JS 执行器 - 基础设施层
//!
//! 持有唯一的 page 资源，只暴露"执行 JS"的能力

use chromiumoxide::Page;
use serde::de::DeserializeOwned;

use crate::error::BrowserError;

/// 取根元素 HTML 的表达式
const OUTER_HTML_EXPRESSION: &str = "document.documentElement.outerHTML";

/// JS 执行器
///
/// 职责：
/// - 持有唯一的 Page 资源
/// - 暴露 eval_as() 能力
/// - 不认识抓取记录，也不处理事件
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(
        &self,
        js_code: impl Into<String>,
    ) -> Result<T, BrowserError> {
        let result = self.page.evaluate(js_code.into()).await?;
        result
            .into_value()
            .map_err(|e| BrowserError::ScriptExecutionFailed {
                source: Box::new(e),
            })
    }

    /// 同步求值根元素的 outerHTML
    pub async fn outer_html(&self) -> Result<String, BrowserError> {
        self.eval_as::<String>(OUTER_HTML_EXPRESSION).await
    }
}
