//! Scrape orchestration: context bootstrap, strategy dispatch and API step
//! execution.

use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::Method;
use scraper::Html;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::browser::{BrowserError, PageRenderer};
use super::context::ScrapeContext;
use super::extract::{extract_fields, extract_from_context};
use super::rule::{ApiStep, SiteRule, Strategy};
use super::template::{has_placeholder, render};
use crate::fetch::{FetchClient, FetchError};

/// Error type for scrape orchestration.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The strategy needs a page URL and none could be derived.
    #[error("url is required for {strategy} strategy")]
    MissingUrl { strategy: Strategy },

    /// The `api` strategy was selected without any steps.
    #[error("api strategy requires api steps")]
    ApiStepsMissing,

    /// A step URL still contains `{…}` placeholders after rendering.
    #[error(
        "step {step} failed: url {url} contains unreplaced placeholders; available keys: {available:?}"
    )]
    UnrenderedPlaceholders {
        step: String,
        url: String,
        available: Vec<String>,
    },

    /// A step request failed.
    #[error("step {step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: FetchError,
    },

    /// The entry fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Browser strategy selected but no browser adapter is wired in.
    #[error("browser strategy requires a running browser adapter")]
    BrowserUnavailable,

    /// The browser adapter failed.
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Executes site rules: builds the parameter context, fetches the document
/// with the rule's strategy and runs the extraction tree.
#[derive(Clone)]
pub struct Scraper {
    client: FetchClient,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl Scraper {
    /// Creates a scraper without browser support; `browser` strategy rules
    /// will fail with [`ScrapeError::BrowserUnavailable`].
    #[must_use]
    pub fn new(client: FetchClient) -> Self {
        Self {
            client,
            renderer: None,
        }
    }

    /// Creates a scraper with a page renderer for `browser` strategy rules.
    #[must_use]
    pub fn with_renderer(client: FetchClient, renderer: Arc<dyn PageRenderer>) -> Self {
        Self {
            client,
            renderer: Some(renderer),
        }
    }

    /// Runs a rule against an override URL (or bare id) and returns the
    /// extracted field map.
    ///
    /// # Errors
    ///
    /// Returns a [`ScrapeError`] when the strategy cannot run or a step
    /// fails; individual extraction fields never abort the scrape.
    #[instrument(skip(self, rule), fields(site = %rule.site_key, strategy = %rule.strategy))]
    pub async fn scrape(
        &self,
        rule: &SiteRule,
        override_url: &str,
    ) -> Result<Map<String, Value>, ScrapeError> {
        let ctx = bootstrap_context(rule, override_url);
        debug!(keys = ?ctx.keys(), "context bootstrapped");

        match rule.strategy {
            Strategy::Static | Strategy::Auto => self.scrape_static(rule, ctx).await,
            Strategy::Browser => self.scrape_browser(rule, ctx).await,
            Strategy::Api => self.scrape_api(rule, ctx).await,
        }
    }

    async fn scrape_static(
        &self,
        rule: &SiteRule,
        mut ctx: ScrapeContext,
    ) -> Result<Map<String, Value>, ScrapeError> {
        let url = ctx.text("url").ok_or(ScrapeError::MissingUrl {
            strategy: rule.strategy,
        })?;

        let headers = rule.entry.as_ref().and_then(|entry| entry.headers.as_ref());
        let response = self.client.get(&url, headers).await?;
        let body = response.text().await.map_err(|source| {
            ScrapeError::Fetch(FetchError::Transport {
                url: url.clone(),
                source,
            })
        })?;
        ctx.default_html = Some(body);

        if let Some(api) = &rule.api {
            self.run_api_steps(&api.steps, &mut ctx).await?;
        }

        info!(url = %url, "static page fetched");
        Ok(extract_from_context(&ctx, &rule.extract))
    }

    async fn scrape_browser(
        &self,
        rule: &SiteRule,
        ctx: ScrapeContext,
    ) -> Result<Map<String, Value>, ScrapeError> {
        let url = ctx.text("url").ok_or(ScrapeError::MissingUrl {
            strategy: rule.strategy,
        })?;
        let renderer = self
            .renderer
            .as_ref()
            .ok_or(ScrapeError::BrowserUnavailable)?;

        let html = renderer
            .fetch_rendered(&url, rule.wait_config.as_ref())
            .await?;
        info!(url = %url, bytes = html.len(), "rendered page captured");

        let doc = Html::parse_document(&html);
        Ok(extract_fields(doc.root_element(), &rule.extract))
    }

    async fn scrape_api(
        &self,
        rule: &SiteRule,
        mut ctx: ScrapeContext,
    ) -> Result<Map<String, Value>, ScrapeError> {
        let steps = rule
            .api
            .as_ref()
            .map(|api| api.steps.as_slice())
            .filter(|steps| !steps.is_empty())
            .ok_or(ScrapeError::ApiStepsMissing)?;

        // Paging defaults for list endpoints.
        if ctx.get("offset").is_none() {
            ctx.set_text("offset", "0");
        }
        if ctx.get("limit").is_none() {
            ctx.set_text("limit", "100");
        }

        if let Some(entry) = &rule.entry {
            if !entry.regex.is_empty() {
                if let Some(url) = ctx.text("url") {
                    if let Ok(re) = Regex::new(&entry.regex) {
                        copy_named_captures(&re, &url, &mut ctx);
                    }
                }
            }
        }

        self.run_api_steps(steps, &mut ctx).await?;
        Ok(extract_from_context(&ctx, &rule.extract))
    }

    /// Runs the steps in order, storing `{id}` (parsed payload) and
    /// `{id}_raw` (raw body) in the context. Any step error aborts the
    /// whole scrape.
    async fn run_api_steps(
        &self,
        steps: &[ApiStep],
        ctx: &mut ScrapeContext,
    ) -> Result<(), ScrapeError> {
        for step in steps {
            let url = render(&step.request.url, &|key| ctx.text(key));
            if has_placeholder(&url) {
                return Err(ScrapeError::UnrenderedPlaceholders {
                    step: step.id.clone(),
                    url,
                    available: ctx.keys(),
                });
            }

            let method = parse_method(&step.request.method);
            debug!(step = %step.id, url = %url, method = %method, "running api step");

            let response = self
                .client
                .request(method, &url, step.request.headers.as_ref())
                .await
                .map_err(|source| ScrapeError::Step {
                    step: step.id.clone(),
                    source,
                })?;
            let body = response.text().await.map_err(|source| ScrapeError::Step {
                step: step.id.clone(),
                source: FetchError::Transport { url, source },
            })?;

            match step.response_kind {
                super::rule::ResponseKind::Html => {
                    ctx.set_text(step.id.clone(), body.clone());
                    ctx.set_text(format!("{}_raw", step.id), body);
                }
                super::rule::ResponseKind::Json => {
                    let parsed = serde_json::from_str::<Value>(&body).unwrap_or_else(|error| {
                        warn!(step = %step.id, %error, "step body is not valid json");
                        Value::Null
                    });
                    ctx.set_json(step.id.clone(), parsed);
                    ctx.set_text(format!("{}_raw", step.id), body);
                }
            }
        }
        Ok(())
    }
}

fn parse_method(method: &str) -> Method {
    if method.is_empty() {
        return Method::GET;
    }
    Method::from_bytes(method.to_ascii_uppercase().as_bytes()).unwrap_or(Method::GET)
}

/// Builds the parameter context from the rule entry and the override input.
///
/// A full URL gets its query copied into the context and stripped; the
/// remainder is matched against the entry template (its `{…}` placeholders
/// become named captures, tolerating trailing sub-segments) and the entry
/// regex. A bare id is stored as `id` and substituted into the entry
/// template. With no input at all, the entry URL itself becomes `url`.
pub(crate) fn bootstrap_context(rule: &SiteRule, override_url: &str) -> ScrapeContext {
    let mut ctx = ScrapeContext::new();
    let input = override_url.trim();
    let entry = rule.entry.as_ref();

    if input.is_empty() {
        if let Some(entry) = entry {
            if !entry.url.is_empty() {
                ctx.set_text("url", entry.url.clone());
            }
        }
        return ctx;
    }

    if input.starts_with("http") {
        let clean_url = strip_query_into(input, &mut ctx);

        if let Some(entry) = entry {
            if !entry.url.is_empty() {
                if let Some(re) = entry_pattern(&entry.url) {
                    copy_named_captures(&re, &clean_url, &mut ctx);
                }
            }
            if !entry.regex.is_empty() {
                if let Ok(re) = Regex::new(&entry.regex) {
                    copy_named_captures(&re, &clean_url, &mut ctx);
                }
            }
            if ctx.get("id").is_none() && entry.url.contains("{id}") {
                if let Some(prefix) = entry.url.split("{id}").next() {
                    if let Some(rest) = clean_url.strip_prefix(prefix) {
                        let rest = rest.trim_end_matches('/');
                        if !rest.is_empty() {
                            ctx.set_text("id", rest);
                        }
                    }
                }
            }
        }
        ctx.set_text("url", clean_url);
    } else {
        ctx.set_text("id", input);
        if let Some(entry) = entry {
            if entry.url.contains("{id}") {
                ctx.set_text("url", entry.url.replace("{id}", input));
            }
        }
    }
    ctx
}

/// Copies the query string into the context (first value per key) and
/// returns the URL without it.
fn strip_query_into(input: &str, ctx: &mut ScrapeContext) -> String {
    match Url::parse(input) {
        Ok(mut parsed) => {
            let pairs: Vec<(String, String)> = parsed
                .query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            for (key, value) in pairs {
                if ctx.get(&key).is_none() {
                    ctx.set_text(key, value);
                }
            }
            parsed.set_query(None);
            parsed.to_string()
        }
        Err(_) => input.to_string(),
    }
}

/// Reinterprets an entry URL template as an anchored pattern: every `{name}`
/// placeholder becomes a named capture matching one path segment, and any
/// trailing `/…` is tolerated.
fn entry_pattern(template: &str) -> Option<Regex> {
    static PLACEHOLDER: LazyLock<Option<Regex>> =
        LazyLock::new(|| Regex::new(r"\\\{(\w+)\\\}").ok());

    let escaped = regex::escape(template);
    let with_groups = PLACEHOLDER
        .as_ref()?
        .replace_all(&escaped, "(?P<$1>[^/]+)");
    Regex::new(&format!("^{with_groups}(?:/.*)?$")).ok()
}

fn copy_named_captures(re: &Regex, haystack: &str, ctx: &mut ScrapeContext) {
    if let Some(caps) = re.captures(haystack) {
        for name in re.capture_names().flatten() {
            if let Some(matched) = caps.name(name) {
                ctx.set_text(name, matched.as_str());
            }
        }
    }
}
