//! Essay website source.
//!
//! The site is expected to have one index page linking to every essay with
//! a relative `*.html` href. Each essay page is reduced to its `<title>` and
//! visible body text; `<br>` and block elements become line and paragraph
//! breaks so the chunker can split on them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Node, Selector};
use std::time::Duration;
use url::Url;

use crate::config::WebSourceConfig;
use crate::ingest::EssaySource;
use crate::models::{Essay, EssayRef};

const USER_AGENT: &str = concat!("essay-rag/", env!("CARGO_PKG_VERSION"));

const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "tr", "table",
    "ul", "ol", "center",
];

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "template"];

pub struct WebSource {
    index_url: Url,
    client: reqwest::Client,
    interval: Duration,
}

impl WebSource {
    pub fn new(config: &WebSourceConfig, requests_per_second: f64) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid ingest.web.base_url: {}", config.base_url))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let index_url = base
            .join(&config.index_path)
            .with_context(|| format!("Invalid ingest.web.index_path: {}", config.index_path))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            index_url,
            client,
            interval: Duration::from_secs_f64(1.0 / requests_per_second),
        })
    }

    async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {} returned {}", url, status);
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl EssaySource for WebSource {
    fn name(&self) -> &str {
        "web"
    }

    fn request_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn list(&self) -> Result<Vec<EssayRef>> {
        let html = self.get(self.index_url.as_str()).await?;
        Ok(essay_links(&html, &self.index_url)
            .into_iter()
            .map(EssayRef::web)
            .collect())
    }

    async fn fetch(&self, essay: &EssayRef) -> Result<Essay> {
        let html = self.get(&essay.url).await?;
        Ok(extract_essay(&html, &essay.url))
    }
}

/// Absolute URLs of every relative `*.html` link on an index page, in page
/// order without repeats.
pub fn essay_links(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut links: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if !href.ends_with(".html") || Url::parse(href).is_ok() || href.starts_with("//") {
            continue;
        }
        if let Ok(url) = base.join(href) {
            let url = url.to_string();
            if !links.contains(&url) {
                links.push(url);
            }
        }
    }
    links
}

/// Reduce an essay page to title and text.
pub fn extract_essay(html: &str, url: &str) -> Essay {
    let document = Html::parse_document(html);
    Essay {
        url: url.to_string(),
        title: extract_title(&document).unwrap_or_else(|| url.to_string()),
        text: extract_text(&document),
        updated_at: None,
    }
}

fn extract_title(document: &Html) -> Option<String> {
    for selector in ["title", "h1"] {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let title = collapse_spaces(&element.text().collect::<String>());
            if !title.is_empty() {
                return Some(title);
            }
        }
    }
    None
}

fn extract_text(document: &Html) -> String {
    let Ok(body) = Selector::parse("body") else {
        return String::new();
    };
    let Some(body) = document.select(&body).next() else {
        return String::new();
    };

    let mut raw = String::new();
    for node in body.descendants() {
        match node.value() {
            Node::Element(element) => match element.name() {
                "br" => raw.push('\n'),
                name if BLOCK_ELEMENTS.contains(&name) => raw.push_str("\n\n"),
                _ => {}
            },
            Node::Text(text) => {
                let hidden = node.ancestors().any(|a| {
                    a.value()
                        .as_element()
                        .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
                });
                if !hidden {
                    // Source newlines inside a text node are plain whitespace.
                    raw.push_str(&text.replace(['\n', '\r', '\t'], " "));
                }
            }
            _ => {}
        }
    }
    normalize_breaks(&raw)
}

/// Collapse runs of spaces within lines, trim every line, and squeeze
/// three or more line breaks into a single blank line.
fn normalize_breaks(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut newlines = 0usize;
    for line in raw.split('\n') {
        let line = collapse_spaces(line);
        if line.is_empty() {
            newlines += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if newlines >= 1 { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        newlines = 0;
    }
    out
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
