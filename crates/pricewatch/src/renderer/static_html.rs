//! JavaScript-free rendering: fetch markup over HTTP and answer selector
//! queries against the parsed document.
//!
//! `scraper` documents are not `Send`, so each loaded document is parsed
//! once on its own worker thread, which also owns the element arena.
//! Queries reach it over a channel and get their answer on a oneshot.

use super::{collapse_whitespace, snapshot_stem, ElementHandle, NavigationResult, RenderContext, Renderer};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, OnceCell};

/// Renderer that fetches pages with a plain HTTP client.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    /// Build the client with the given user agent.
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Ok(Box::new(StaticContext::fetching(self.client.clone())))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

enum DomRequest {
    Exists {
        selector: Selector,
        reply: oneshot::Sender<bool>,
    },
    Select {
        selector: Selector,
        scope: Option<ElementHandle>,
        reply: oneshot::Sender<Result<Vec<ElementHandle>>>,
    },
    Text {
        element: ElementHandle,
        reply: oneshot::Sender<Result<Option<String>>>,
    },
}

/// Handle to the thread holding one parsed document. Dropping it stops the thread.
struct DocumentWorker {
    requests: mpsc::UnboundedSender<DomRequest>,
}

impl DocumentWorker {
    fn spawn(html: Arc<str>, parses: Arc<AtomicUsize>) -> Result<Self> {
        let (requests, inbox) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("pricewatch-dom".to_string())
            .spawn(move || serve_document(&html, &parses, inbox))
            .context("starting document worker")?;
        Ok(Self { requests })
    }

    fn send(&self, request: DomRequest) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| anyhow!("document worker stopped"))
    }
}

fn serve_document(html: &str, parses: &AtomicUsize, mut inbox: mpsc::UnboundedReceiver<DomRequest>) {
    let document = Html::parse_document(html);
    parses.fetch_add(1, Ordering::Relaxed);
    let mut arena: Vec<ElementRef<'_>> = Vec::new();

    while let Some(request) = inbox.blocking_recv() {
        match request {
            DomRequest::Exists { selector, reply } => {
                let _ = reply.send(document.select(&selector).next().is_some());
            }
            DomRequest::Select {
                selector,
                scope,
                reply,
            } => {
                let found: Result<Vec<ElementRef<'_>>> = match scope {
                    None => Ok(document.select(&selector).collect()),
                    Some(handle) => arena
                        .get(handle.0)
                        .map(|el| el.select(&selector).collect())
                        .ok_or_else(|| anyhow!("unknown element handle {}", handle.0)),
                };
                let handles = found.map(|elements| {
                    elements
                        .into_iter()
                        .map(|el| {
                            arena.push(el);
                            ElementHandle(arena.len() - 1)
                        })
                        .collect()
                });
                let _ = reply.send(handles);
            }
            DomRequest::Text { element, reply } => {
                let text = arena
                    .get(element.0)
                    .map(|el| {
                        let text = collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "));
                        (!text.is_empty()).then_some(text)
                    })
                    .ok_or_else(|| anyhow!("unknown element handle {}", element.0));
                let _ = reply.send(text);
            }
        }
    }
}

/// A page held as markup.
pub struct StaticContext {
    client: Option<reqwest::Client>,
    html: Arc<str>,
    document: OnceCell<DocumentWorker>,
    parses: Arc<AtomicUsize>,
}

impl StaticContext {
    /// A context that loads documents over HTTP on `navigate`.
    pub fn fetching(client: reqwest::Client) -> Self {
        Self::with_markup(Some(client), Arc::from(""))
    }

    /// A context preloaded with fixed markup; `navigate` keeps the markup.
    pub fn from_html(html: impl Into<String>) -> Self {
        Self::with_markup(None, Arc::from(html.into()))
    }

    fn with_markup(client: Option<reqwest::Client>, html: Arc<str>) -> Self {
        Self {
            client,
            html,
            document: OnceCell::new(),
            parses: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The worker for the current markup, started on first use.
    async fn document(&self) -> Result<&DocumentWorker> {
        self.document
            .get_or_try_init(|| async {
                DocumentWorker::spawn(Arc::clone(&self.html), Arc::clone(&self.parses))
            })
            .await
    }

    fn load(&mut self, html: String) {
        self.html = Arc::from(html);
        self.document = OnceCell::new();
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| anyhow!("invalid selector {selector:?}: {e}"))
}

#[async_trait]
impl RenderContext for StaticContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();

        let Some(client) = &self.client else {
            return Ok(NavigationResult {
                final_url: url.to_string(),
                status: Some(200),
                load_time_ms: 0,
            });
        };

        let resp = client
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .with_context(|| format!("fetching {url}"))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        if !resp.status().is_success() {
            bail!("fetching {url} returned status {status}");
        }
        let body = resp.text().await.context("reading response body")?;
        self.load(body);

        Ok(NavigationResult {
            final_url,
            status: Some(status),
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn wait_for_selector(&self, selector: &str, _timeout_ms: u64) -> Result<bool> {
        // Static markup never changes, so presence is decided immediately.
        let selector = parse_selector(selector)?;
        let (reply, answer) = oneshot::channel();
        self.document()
            .await?
            .send(DomRequest::Exists { selector, reply })?;
        answer.await.context("document worker stopped")
    }

    async fn query_selector_all(
        &self,
        selector: &str,
        scope: Option<ElementHandle>,
    ) -> Result<Vec<ElementHandle>> {
        let selector = parse_selector(selector)?;
        let (reply, answer) = oneshot::channel();
        self.document().await?.send(DomRequest::Select {
            selector,
            scope,
            reply,
        })?;
        answer.await.context("document worker stopped")?
    }

    async fn inner_text(&self, element: ElementHandle) -> Result<Option<String>> {
        let (reply, answer) = oneshot::channel();
        self.document()
            .await?
            .send(DomRequest::Text { element, reply })?;
        answer.await.context("document worker stopped")?
    }

    async fn content(&self) -> Result<String> {
        Ok(self.html.to_string())
    }

    async fn snapshot(&self, dir: &Path, label: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating snapshot dir {}", dir.display()))?;
        let path = dir.join(format!("{}.html", snapshot_stem(label)));
        tokio::fs::write(&path, self.html.as_bytes())
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;

    const PAGE: &str = r#"
        <html><body>
          <ul>
            <li class="s-item"><span class="s-item__price">$150.00</span></li>
            <li class="s-item"><span class="s-item__price">
                $162.50
            </span></li>
            <li class="s-item"><span class="other">n/a</span></li>
          </ul>
        </body></html>
    "#;

    #[tokio::test]
    async fn test_query_and_text() {
        let ctx = StaticContext::from_html(PAGE);
        let items = ctx.query_selector_all("li.s-item", None).await.unwrap();
        assert_eq!(items.len(), 3);

        let prices = ctx
            .query_selector_all(".s-item__price", Some(items[1]))
            .await
            .unwrap();
        assert_eq!(prices.len(), 1);
        let text = ctx.inner_text(prices[0]).await.unwrap();
        assert_eq!(text.as_deref(), Some("$162.50"));

        let none = ctx
            .query_selector_all(".s-item__price", Some(items[2]))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_listing_page_parsed_once() {
        let items: String = (0..120)
            .map(|i| {
                format!(
                    r#"<li class="s-item"><div class="s-item__title">Card {i}</div>
                       <span class="s-item__price">${}.00</span></li>"#,
                    100 + i
                )
            })
            .collect();
        let ctx = StaticContext::from_html(format!("<html><body><ul>{items}</ul></body></html>"));

        let listings = ctx.query_selector_all("li.s-item", None).await.unwrap();
        assert_eq!(listings.len(), 120);
        let mut texts = Vec::new();
        for listing in &listings {
            for price in ctx
                .query_selector_all(".s-item__price", Some(*listing))
                .await
                .unwrap()
            {
                texts.push(ctx.inner_text(price).await.unwrap());
            }
        }

        assert_eq!(texts.len(), 120);
        assert_eq!(texts[0].as_deref(), Some("$100.00"));
        assert_eq!(texts[119].as_deref(), Some("$219.00"));
        assert_eq!(ctx.parses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_navigation_replaces_document() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sch/i.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let mut ctx = StaticContext::fetching(reqwest::Client::new());
        let url = format!("{}/sch/i.html", server.uri());
        ctx.navigate(&url, 5_000).await.unwrap();
        let first = ctx.query_selector_all("li.s-item", None).await.unwrap();
        assert_eq!(first.len(), 3);

        ctx.navigate(&url, 5_000).await.unwrap();
        assert_eq!(ctx.query_selector_all("li.s-item", None).await.unwrap().len(), 3);
        assert_eq!(ctx.parses.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_unknown_handle_errors() {
        let ctx = StaticContext::from_html(PAGE);
        assert!(ctx.inner_text(ElementHandle(99)).await.is_err());
        assert!(ctx
            .query_selector_all(".s-item__price", Some(ElementHandle(99)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_invalid_selector_errors() {
        let ctx = StaticContext::from_html(PAGE);
        assert!(ctx.query_selector_all("li[", None).await.is_err());
    }

    #[tokio::test]
    async fn test_wait_for_selector_is_immediate() {
        let ctx = StaticContext::from_html(PAGE);
        assert!(ctx.wait_for_selector("li.s-item", 10).await.unwrap());
        assert!(!ctx.wait_for_selector("div.missing", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_writes_markup() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StaticContext::from_html(PAGE);
        let path = ctx.snapshot(dir.path(), "Charizard PSA 10").await.unwrap();
        assert!(path.extension().is_some_and(|e| e == "html"));
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("s-item__price"));
    }

    #[tokio::test]
    async fn test_fetching_context_reads_body() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sch/i.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let renderer = HttpRenderer::new(DEFAULT_USER_AGENT).unwrap();
        let mut ctx = renderer.new_context().await.unwrap();
        let nav = ctx
            .navigate(&format!("{}/sch/i.html?_nkw=x", server.uri()), 5_000)
            .await
            .unwrap();
        assert_eq!(nav.status, Some(200));
        let items = ctx.query_selector_all("li.s-item", None).await.unwrap();
        assert_eq!(items.len(), 3);
        ctx.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fetching_context_rejects_error_status() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut ctx = StaticContext::fetching(reqwest::Client::new());
        assert!(ctx.navigate(&server.uri(), 5_000).await.is_err());
    }
}
