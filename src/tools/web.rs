//! Outbound network tools; every request passes the policy's host check

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::registry::{ArgSpec, Constraint, ToolSpec};
use super::{str_arg, Arguments, ToolContext, ToolError, ToolHandler};
use crate::executor::policy::PolicyViolation;

const MAX_RELATED: usize = 5;
const BODY_PREVIEW_CHARS: usize = 500;
const MAX_SEARCH_RESPONSE_BYTES: usize = 1024 * 1024;

/// A refused redirect surfaces as the policy violation that refused it
fn request_failed(context: &str, e: reqwest::Error) -> ToolError {
    let mut source = std::error::Error::source(&e);
    while let Some(inner) = source {
        if let Some(violation) = inner.downcast_ref::<PolicyViolation>() {
            return ToolError::Denied(violation.clone());
        }
        source = inner.source();
    }
    ToolError::Fault(format!("{context}: {e}"))
}

/// Read at most `limit` bytes of the body; `true` if more was available
async fn read_body(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<(Vec<u8>, bool), ToolError> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| request_failed("cannot read body", e))?
    {
        let room = limit - body.len();
        if chunk.len() > room {
            body.extend_from_slice(&chunk[..room]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk);
    }
    Ok((body, false))
}

/// Instant-answer response (DuckDuckGo `format=json` shape)
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct InstantAnswer {
    heading: String,
    answer: String,
    abstract_text: String,
    #[serde(rename = "AbstractURL")]
    abstract_url: String,
    related_topics: Vec<RelatedTopic>,
}

/// A related topic is either a leaf or a named group of leaves
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RelatedTopic {
    text: String,
    #[serde(rename = "FirstURL")]
    first_url: String,
    topics: Vec<RelatedTopic>,
}

impl InstantAnswer {
    fn render(&self, query: &str) -> String {
        let mut lines = Vec::new();
        if !self.heading.is_empty() {
            lines.push(self.heading.clone());
        }
        if !self.answer.is_empty() {
            lines.push(format!("Answer: {}", self.answer));
        }
        if !self.abstract_text.is_empty() {
            lines.push(self.abstract_text.clone());
            if !self.abstract_url.is_empty() {
                lines.push(format!("Source: {}", self.abstract_url));
            }
        }

        let related: Vec<&RelatedTopic> = self
            .related_topics
            .iter()
            .flat_map(|t| if t.topics.is_empty() { vec![t] } else { t.topics.iter().collect() })
            .filter(|t| !t.text.is_empty())
            .take(MAX_RELATED)
            .collect();
        if !related.is_empty() {
            lines.push("Related:".to_string());
            for topic in related {
                lines.push(format!("- {} ({})", topic.text, topic.first_url));
            }
        }

        if lines.is_empty() {
            format!("No results found for '{query}'")
        } else {
            lines.join("\n")
        }
    }
}

struct WebSearch;

#[async_trait]
impl ToolHandler for WebSearch {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = str_arg(args, "query")?.trim();
        let mut url = ctx.policy.check_url(&ctx.search_endpoint)?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("format", "json")
            .append_pair("no_html", "1")
            .append_pair("skip_disambig", "1");
        debug!(endpoint = %ctx.search_endpoint, "running web search");

        let response = ctx
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| request_failed("search request failed", e))?;
        if !response.status().is_success() {
            return Err(ToolError::Fault(format!(
                "search service returned HTTP {}",
                response.status()
            )));
        }
        let (body, overflow) = read_body(response, MAX_SEARCH_RESPONSE_BYTES).await?;
        if overflow {
            return Err(ToolError::Fault(format!(
                "search response larger than {MAX_SEARCH_RESPONSE_BYTES} bytes"
            )));
        }
        let answer: InstantAnswer = serde_json::from_slice(&body)
            .map_err(|e| ToolError::Fault(format!("unreadable search response: {e}")))?;
        Ok(answer.render(query))
    }
}

pub fn web_search() -> ToolSpec {
    ToolSpec::new(
        "web_search",
        "Search the web for current information, news or facts the model may not know. \
         Use when the user asks to search, look up or find the latest information.",
        vec![ArgSpec::string("query", "The search query")
            .required()
            .constraint(Constraint::MaxLength(500))],
        Arc::new(WebSearch),
    )
    .with_timeout(Duration::from_secs(20))
}

struct HttpGet;

#[async_trait]
impl ToolHandler for HttpGet {
    async fn call(&self, args: &Arguments, ctx: &ToolContext) -> Result<String, ToolError> {
        let raw = str_arg(args, "url")?.trim();
        let raw = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("https://{raw}")
        };
        let url = ctx.policy.check_url(&raw)?;

        let response = ctx
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| request_failed(&format!("request to {raw} failed"), e))?;
        let status = response.status();

        // a UTF-8 char is at most 4 bytes, so this always covers the preview
        let limit = (BODY_PREVIEW_CHARS * 4).min(ctx.policy.output_cap);
        let (bytes, overflow) = read_body(response, limit).await?;
        let body = String::from_utf8_lossy(&bytes);

        let preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
        let more = overflow || body.chars().count() > BODY_PREVIEW_CHARS;
        let ellipsis = if more { "..." } else { "" };
        Ok(format!("Status: {status}\nBody:\n{preview}{ellipsis}"))
    }
}

pub fn http_get() -> ToolSpec {
    ToolSpec::new(
        "http_get",
        "Fetch a URL with an HTTP GET request and show the status and the start of the body. \
         Use when the user asks to curl, fetch or open a specific URL.",
        vec![ArgSpec::string("url", "The URL to fetch").required().sensitive()],
        Arc::new(HttpGet),
    )
    .with_timeout(Duration::from_secs(15))
}
