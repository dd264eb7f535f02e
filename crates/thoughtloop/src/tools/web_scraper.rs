use std::sync::LazyLock;

use regex::Regex;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use thoughtloop_core::tool::{Error as ToolError, Tool, ToolResult};

use super::fetch::{FetchContext, FetchError};

const DEFAULT_MAX_CHARS: usize = 1000;

static NOISE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "header", "footer", "nav"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                .expect("valid noise pattern")
        })
        .collect()
});
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid comment pattern"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag pattern"));
static CONTAINER_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["main", "article", "body"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>(.*?)</{tag}\s*>"))
                .expect("valid container pattern")
        })
        .collect()
});

#[derive(Deserialize, JsonSchema)]
pub struct WebScraperParameters {
    #[schemars(description = "WebページのURL")]
    url: String,
    #[schemars(description = "取得するテキストの最大文字数")]
    #[serde(default = "default_max_chars")]
    max_chars: usize,
}

fn default_max_chars() -> usize {
    DEFAULT_MAX_CHARS
}

/// A tool that extracts the main text of a web page.
pub struct WebScraperTool {
    fetch: FetchContext,
    parameter_schema: Value,
}

impl WebScraperTool {
    /// Creates a new scraper sharing the throttling state of `fetch`.
    pub fn new(fetch: FetchContext) -> Self {
        WebScraperTool {
            fetch,
            parameter_schema: schema_for!(WebScraperParameters).to_value(),
        }
    }
}

impl Tool for WebScraperTool {
    type Input = WebScraperParameters;

    fn name(&self) -> &str {
        "web_scraper"
    }

    fn description(&self) -> &str {
        "指定されたURLから主要テキストを抽出するツール。入力はURL。"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    #[allow(clippy::manual_async_fn)]
    fn execute(
        &self,
        input: WebScraperParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let fetch = self.fetch.clone();
        async move {
            let url = input.url.trim();
            let html = fetch.fetch(url).await.map_err(|err| match err {
                FetchError::InvalidUrl(_) => {
                    ToolError::invalid_input().with_reason(format!("{err}"))
                }
                err => ToolError::execution_error()
                    .with_reason(format!("fetch {url}: {err}")),
            })?;
            let Some(text) = extract_text(&html) else {
                return Ok("No content".to_owned());
            };
            Ok(text.chars().take(input.max_chars).collect())
        }
    }
}

/// Returns the whitespace-collapsed text of the first `main`, `article` or
/// `body` element, or `None` if there is no such element or it is empty.
pub(crate) fn extract_text(html: &str) -> Option<String> {
    let html = COMMENT_RE.replace_all(html, " ");
    let mut html = html.into_owned();
    for re in NOISE_RES.iter() {
        html = re.replace_all(&html, " ").into_owned();
    }

    let inner = CONTAINER_RES
        .iter()
        .find_map(|re| re.captures(&html))
        .and_then(|caps| caps.get(1))?
        .as_str();
    let text = decode_entities(&TAG_RE.replace_all(inner, " "));
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
