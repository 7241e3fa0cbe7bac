//! `web_fetch`: HTTP GET a page and return its title, description, and text.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::context::ToolContext;
use crate::tools::tool::{HandlerError, Tool, ToolOutput, require_str};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters of extracted text returned to the model.
const CONTENT_PREVIEW_CHARS: usize = 3000;

/// Maximum body size read from the server (2MB). The rest is dropped.
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

const USER_AGENT: &str = concat!("taskhive/", env!("CARGO_PKG_VERSION"));

static STRIP_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["script", "style", "noscript", "iframe", "svg", "canvas"]
        .iter()
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).unwrap())
        .collect()
});

static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());

static META_DESC_NAME_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]*name=["']description["'][^>]*content=["']([^"']+)"#).unwrap()
});

static META_DESC_CONTENT_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]*content=["']([^"']+)["'][^>]*name=["']description["']"#).unwrap()
});

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s, " ").trim().to_string()
}

fn capture(re: &Regex, haystack: &str) -> Option<String> {
    re.captures(haystack)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Extracted view of an HTML page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSummary {
    pub title: String,
    pub description: Option<String>,
    pub text: String,
}

/// Strip non-content blocks and tags, pulling out title and meta description.
pub fn extract_html(html: &str) -> PageSummary {
    let mut cleaned = html.to_string();
    for re in STRIP_BLOCKS.iter() {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }

    let title = capture(&TITLE, &cleaned)
        .map(|t| collapse_whitespace(&t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "No title".to_string());

    let description = capture(&META_DESC_NAME_FIRST, &cleaned)
        .or_else(|| capture(&META_DESC_CONTENT_FIRST, &cleaned))
        .map(|d| d.trim().to_string());

    let text = TAGS.replace_all(&cleaned, " ").into_owned();

    PageSummary {
        title,
        description,
        text: collapse_whitespace(&text),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(CONTENT_PREVIEW_CHARS).collect()
}

/// Read at most `limit` bytes of the body. The flag is set when more was
/// available.
async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<(String, bool), HandlerError> {
    let mut body = Vec::new();
    let mut truncated = false;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| HandlerError::ExecutionFailed(format!("Failed to read body: {e}")))?
    {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            truncated = true;
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok((String::from_utf8_lossy(&body).into_owned(), truncated))
}

/// Web page fetch tool.
pub struct WebFetchTool {
    http: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return structured data: title, meta description, and a \
         text preview. Summarize the result rather than returning it raw."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http:// or https:// URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, HandlerError> {
        let url = require_str(&params, "url")?.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(HandlerError::InvalidParameters(format!("Invalid URL: {url}")));
        }

        let start = std::time::Instant::now();
        tracing::debug!(task_id = %ctx.task_id, url, "Fetching page");

        let response = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HandlerError::Timeout(FETCH_TIMEOUT)
                } else {
                    HandlerError::ExecutionFailed(format!("Failed to fetch page: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandlerError::ExecutionFailed(format!(
                "Server answered HTTP {status}"
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let (body, truncated) = read_capped(response, MAX_BODY_SIZE).await?;
        if truncated {
            tracing::debug!(task_id = %ctx.task_id, url, limit = MAX_BODY_SIZE, "Body truncated");
        }

        let mut result = if content_type.contains("text/html") {
            let page = extract_html(&body);
            serde_json::json!({
                "url": url,
                "title": page.title,
                "description": page.description,
                "content": preview(&page.text),
                "content_length": page.text.len(),
            })
        } else if content_type.contains("application/json") {
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(data) => serde_json::json!({
                    "url": url,
                    "title": "JSON Data",
                    "description": null,
                    "content": preview(&serde_json::to_string_pretty(&data).unwrap_or_default()),
                    "content_length": body.len(),
                    "is_json": true,
                }),
                Err(e) => serde_json::json!({
                    "url": url,
                    "title": "JSON (parse error)",
                    "description": e.to_string(),
                    "content": preview(&body),
                    "content_length": body.len(),
                }),
            }
        } else {
            serde_json::json!({
                "url": url,
                "title": "Unknown",
                "description": null,
                "content": preview(&body),
                "content_length": body.len(),
                "content_type": content_type,
            })
        };

        if truncated {
            result["truncated"] = serde_json::Value::Bool(true);
        }
        Ok(ToolOutput::success(result, start.elapsed()))
    }

    fn execution_timeout(&self) -> Duration {
        FETCH_TIMEOUT + Duration::from_secs(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <title>
     Example   Domain
  </title>
  <meta name="description" content="An illustrative page">
  <style>body { color: red; }</style>
  <script>var secret = "do not show";</script>
</head>
<body><h1>Hello</h1><p>World &amp; more</p></body></html>"#;

    #[test]
    fn extracts_title_description_and_text() {
        let page = extract_html(PAGE);
        assert_eq!(page.title, "Example Domain");
        assert_eq!(page.description.as_deref(), Some("An illustrative page"));
        assert!(page.text.contains("Hello World"));
        assert!(!page.text.contains("secret"));
        assert!(!page.text.contains("color"));
    }

    #[test]
    fn description_with_content_before_name() {
        let page = extract_html(r#"<meta content="Reversed" name="description"><p>x</p>"#);
        assert_eq!(page.description.as_deref(), Some("Reversed"));
        assert_eq!(page.title, "No title");
    }

    #[test]
    fn preview_is_char_bounded() {
        let long = "é".repeat(CONTENT_PREVIEW_CHARS + 10);
        assert_eq!(preview(&long).chars().count(), CONTENT_PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn oversized_bodies_are_cut_at_the_cap() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = axum::Router::new().route(
            "/big",
            axum::routing::get(|| async { "a".repeat(MAX_BODY_SIZE + 4096) }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let ctx = ToolContext::new("t-1", std::env::temp_dir());
        let out = WebFetchTool::new()
            .execute(serde_json::json!({"url": format!("http://{addr}/big")}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["content_length"], MAX_BODY_SIZE);
        assert_eq!(out.result["truncated"], true);
        assert_eq!(
            out.result["content"].as_str().unwrap().len(),
            CONTENT_PREVIEW_CHARS
        );
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let ctx = ToolContext::new("t-1", std::env::temp_dir());
        let err = WebFetchTool::new()
            .execute(serde_json::json!({"url": "file:///etc/passwd"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParameters(_)));
    }
}
