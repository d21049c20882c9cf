//! Web search tool — DuckDuckGo HTML search, no API key required.
//!
//! This is the guarded, search-class capability: the engine runs every query
//! through the search guard before calling [`Tool::execute`].

use super::{Tool, ToolResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RESULTS: usize = 5;

pub struct WebSearchTool {
    client: reqwest::Client,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("TianjiEngine/0.1")
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        let html = self
            .client
            .get(&url)
            .send()
            .await
            .context("search request failed")?
            .text()
            .await
            .context("failed to read search response")?;
        Ok(parse_results(&html, MAX_RESULTS))
    }
}

#[derive(Debug, Clone)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let link_re = regex::Regex::new(
        r#"<a[^>]+class="result__a"[^>]+href="([^"]+)"[^>]*>([^<]+)</a>"#,
    )
    .expect("static regex");
    let snippet_re =
        regex::Regex::new(r#"<a[^>]+class="result__snippet"[^>]*>([^<]+)</a>"#)
            .expect("static regex");

    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| {
            html_escape::decode_html_entities(c.get(1).map(|m| m.as_str()).unwrap_or(""))
                .to_string()
        })
        .collect();

    link_re
        .captures_iter(html)
        .take(max_results)
        .enumerate()
        .map(|(i, cap)| {
            let raw_url = cap.get(1).map(|m| m.as_str()).unwrap_or("");
            let title = cap.get(2).map(|m| m.as_str()).unwrap_or("");
            SearchHit {
                title: html_escape::decode_html_entities(title).to_string(),
                url: unwrap_redirect(raw_url),
                snippet: snippets.get(i).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

/// DuckDuckGo wraps result URLs in a redirect; extract the target.
fn unwrap_redirect(url: &str) -> String {
    match url.split("uddg=").nth(1) {
        Some(tail) => urlencoding::decode(tail.split('&').next().unwrap_or(""))
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| url.to_string()),
        None => url.to_string(),
    }
}

#[derive(Deserialize)]
struct Params {
    query: String,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn id(&self) -> &str {
        "websearch"
    }

    fn name(&self) -> &str {
        "联网搜索"
    }

    fn description(&self) -> &str {
        "联网搜索最新信息，返回标题、链接与摘要。搜索词应为简短关键词，每次会话最多可用3次。"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "简短的搜索关键词"}
            },
            "required": ["query"]
        })
    }

    fn search_class(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        let p: Params = serde_json::from_value(args).context("invalid websearch params")?;
        if p.query.trim().is_empty() {
            return Ok(ToolResult::error("搜索词不能为空"));
        }

        let hits = self.search(&p.query).await?;
        if hits.is_empty() {
            return Ok(ToolResult::success("没有找到相关结果"));
        }

        let output = hits
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {}\n   {}\n   {}", i + 1, h.title, h.url, h.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(ToolResult::success(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_results_and_unwraps_redirects() {
        let html = r##"
            <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&amp;rut=abc">Example &amp; Co</a>
            <a class="result__snippet" href="#">A snippet here</a>
        "##;
        let hits = parse_results(html, 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Example & Co");
        assert_eq!(hits[0].url, "https://example.com/page");
        assert_eq!(hits[0].snippet, "A snippet here");
    }

    #[test]
    fn plain_urls_pass_through() {
        assert_eq!(unwrap_redirect("https://example.com"), "https://example.com");
    }
}
