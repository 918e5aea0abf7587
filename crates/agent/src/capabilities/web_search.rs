use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use concierge_core::config::ToolsConfig;

use crate::planner::WEB_SEARCH;
use crate::tools::{Capability, CapabilityResult, ToolArguments};

const SNIPPET_CHARS: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// DuckDuckGo Instant Answer API. No key required.
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: Url,
}

impl DuckDuckGoSearch {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).with_context(|| format!("invalid search endpoint `{endpoint}`"))?;
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("concierge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build search client")?;
        Ok(Self { client, endpoint })
    }
}

#[derive(Debug, Default, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(Debug, Default, Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
    #[serde(rename = "Topics", default)]
    topics: Vec<RelatedTopic>,
}

impl InstantAnswer {
    fn into_hits(self, max_results: usize) -> Vec<SearchHit> {
        let mut hits = Vec::new();
        if !self.abstract_text.trim().is_empty() {
            hits.push(SearchHit {
                title: self.heading,
                snippet: self.abstract_text,
                url: self.abstract_url,
            });
        }

        let mut pending: Vec<RelatedTopic> = self.related_topics.into_iter().rev().collect();
        while let Some(topic) = pending.pop() {
            if hits.len() >= max_results {
                break;
            }
            if !topic.topics.is_empty() {
                pending.extend(topic.topics.into_iter().rev());
                continue;
            }
            if topic.text.trim().is_empty() {
                continue;
            }
            let title = topic.text.split(" - ").next().unwrap_or_default().trim().to_string();
            hits.push(SearchHit { title, snippet: topic.text, url: topic.first_url });
        }

        hits.truncate(max_results);
        hits
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let answer: InstantAnswer = self
            .client
            .get(self.endpoint.clone())
            .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(answer.into_hits(max_results))
    }
}

pub struct WebSearch {
    enabled: bool,
    provider: Option<Arc<dyn SearchProvider>>,
    max_results: usize,
}

impl WebSearch {
    pub fn new(enabled: bool, provider: Option<Arc<dyn SearchProvider>>, max_results: usize) -> Self {
        Self { enabled, provider, max_results }
    }

    /// An endpoint that does not parse leaves the capability permanently
    /// unavailable instead of failing startup.
    pub fn from_config(config: &ToolsConfig) -> Self {
        let timeout = Duration::from_secs(config.web_search_timeout_secs);
        let provider = match DuckDuckGoSearch::new(&config.web_search_endpoint, timeout) {
            Ok(provider) => Some(Arc::new(provider) as Arc<dyn SearchProvider>),
            Err(error) => {
                warn!(
                    event_name = "capability.web_search.unavailable",
                    error = %error,
                    "web search disabled"
                );
                None
            }
        };
        Self::new(config.web_search_enabled, provider, config.web_search_max_results)
    }
}

fn shorten(text: &str) -> String {
    let flattened = text.replace('\n', " ");
    if flattened.chars().count() > SNIPPET_CHARS {
        let cut: String = flattened.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    } else {
        flattened
    }
}

fn render(query: &str, hits: &[SearchHit]) -> String {
    let mut sections = vec![format!("Results for: {query}")];
    for (index, hit) in hits.iter().enumerate() {
        sections.push(format!("{}. {}\n   {}\n   {}", index + 1, hit.title, shorten(&hit.snippet), hit.url));
    }
    sections.join("\n\n")
}

#[async_trait]
impl Capability for WebSearch {
    fn name(&self) -> &str {
        WEB_SEARCH
    }

    fn description(&self) -> &str {
        "Search the web for a query and return top results."
    }

    fn is_available(&self) -> bool {
        self.enabled && self.provider.is_some()
    }

    async fn execute(&self, arguments: &ToolArguments) -> Result<CapabilityResult> {
        let query = arguments.get("query").and_then(|value| value.as_str()).unwrap_or_default().trim();
        if query.is_empty() {
            return Ok(CapabilityResult::failure("no query provided"));
        }
        let Some(provider) = &self.provider else {
            return Ok(CapabilityResult::failure("search provider is not configured"));
        };

        let hits = match provider.search(query, self.max_results).await {
            Ok(hits) => hits,
            Err(error) => {
                return Ok(CapabilityResult::failure(format!("search failed: {error}")));
            }
        };
        let hits: Vec<SearchHit> = hits.into_iter().take(self.max_results).collect();

        if hits.is_empty() {
            return Ok(CapabilityResult::success("No results found.").with_extra("results", json!([])));
        }

        Ok(CapabilityResult::success(render(query, &hits)).with_extra("results", json!(hits)))
    }
}
