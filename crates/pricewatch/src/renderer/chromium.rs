//! Headless Chrome renderer over the DevTools protocol.
//!
//! One browser process is shared; every context is a fresh browser context
//! (separate cookies and storage) with a single page, disposed on close.

use super::{collapse_whitespace, snapshot_stem, ElementHandle, NavigationResult, RenderContext, Renderer};
use crate::config::BrowserSettings;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::element::Element;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hides the `navigator.webdriver` automation flag before any page script runs.
const WEBDRIVER_PATCH: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => false, configurable: true });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'], configurable: true });
"#;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Renderer backed by a shared headless Chrome process.
pub struct ChromiumRenderer {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    user_agent: String,
}

impl ChromiumRenderer {
    /// Launch Chrome with the given settings.
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let (width, height) = settings.window_size;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .request_timeout(Duration::from_secs(60))
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("invalid browser config: {e}"))?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .context("failed to launch chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("browser handler event error: {e}");
                }
            }
        });

        info!(headless = settings.headless, "chromium launched");

        Ok(Self {
            browser: Arc::new(browser),
            handler,
            user_agent: settings.user_agent.clone(),
        })
    }
}

impl Drop for ChromiumRenderer {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

impl ChromiumRenderer {
    async fn open_page(&self, context_id: BrowserContextId) -> Result<Page> {
        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id)
            .build()
            .map_err(|e| anyhow!("invalid target params: {e}"))?;

        let page = self
            .browser
            .new_page(target)
            .await
            .context("opening page")?;

        page.set_user_agent(self.user_agent.as_str())
            .await
            .context("setting user agent")?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(WEBDRIVER_PATCH))
            .await
            .context("installing page setup script")?;
        Ok(page)
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let created = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .context("creating browser context")?;
        let context_id = created.result.browser_context_id.clone();
        let disposal = dispose_context(Arc::clone(&self.browser), context_id.clone());

        match self.open_page(context_id).await {
            Ok(page) => Ok(Box::new(ChromiumContext {
                page,
                disposal,
                elements: Mutex::new(Vec::new()),
            })),
            Err(e) => {
                if let Err(dispose_err) = disposal.run().await {
                    warn!("{dispose_err:#}");
                }
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

fn dispose_context(browser: Arc<Browser>, context_id: BrowserContextId) -> Cleanup {
    Cleanup::new("browser context", async move {
        browser
            .execute(DisposeBrowserContextParams::new(context_id))
            .await
            .context("disposing browser context")?;
        Ok(())
    })
}

/// Async cleanup that runs exactly once: awaited through [`Cleanup::run`],
/// or spawned onto the runtime when dropped without it.
struct Cleanup {
    label: &'static str,
    action: std::sync::Mutex<Option<BoxFuture<'static, Result<()>>>>,
}

impl Cleanup {
    fn new(label: &'static str, action: impl Future<Output = Result<()>> + Send + 'static) -> Self {
        Self {
            label,
            action: std::sync::Mutex::new(Some(action.boxed())),
        }
    }

    fn take(&mut self) -> Option<BoxFuture<'static, Result<()>>> {
        self.action
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn run(mut self) -> Result<()> {
        match self.take() {
            Some(action) => action.await,
            None => Ok(()),
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        let Some(action) = self.take() else {
            return;
        };
        let label = self.label;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("{label} dropped without close; cleaning up in background");
                handle.spawn(async move {
                    if let Err(e) = action.await {
                        warn!("background cleanup of {label} failed: {e:#}");
                    }
                });
            }
            Err(_) => warn!("{label} leaked: no runtime to clean it up"),
        }
    }
}

/// One isolated browser context with a single page.
pub struct ChromiumContext {
    page: Page,
    disposal: Cleanup,
    elements: Mutex<Vec<Arc<Element>>>,
}

impl ChromiumContext {
    async fn element(&self, handle: ElementHandle) -> Result<Arc<Element>> {
        self.elements
            .lock()
            .await
            .get(handle.0)
            .cloned()
            .ok_or_else(|| anyhow!("unknown element handle {}", handle.0))
    }

    async fn register(&self, found: Vec<Element>) -> Vec<ElementHandle> {
        let mut arena = self.elements.lock().await;
        found
            .into_iter()
            .map(|el| {
                arena.push(Arc::new(el));
                ElementHandle(arena.len() - 1)
            })
            .collect()
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult> {
        let start = Instant::now();
        // Handles from the previous document are dead after navigation.
        self.elements.lock().await.clear();

        let page = &self.page;
        let load = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            anyhow::Ok(())
        };
        tokio::time::timeout(Duration::from_millis(timeout_ms), load)
            .await
            .map_err(|_| anyhow!("navigation to {url} timed out after {timeout_ms}ms"))?
            .with_context(|| format!("navigating to {url}"))?;

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(NavigationResult {
            final_url,
            status: None,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Ok(found) = self.page.find_elements(selector).await {
                if !found.is_empty() {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn query_selector_all(
        &self,
        selector: &str,
        scope: Option<ElementHandle>,
    ) -> Result<Vec<ElementHandle>> {
        let found = match scope {
            None => self
                .page
                .find_elements(selector)
                .await
                .with_context(|| format!("querying {selector}"))?,
            Some(handle) => self
                .element(handle)
                .await?
                .find_elements(selector)
                .await
                .with_context(|| format!("querying {selector} within element {}", handle.0))?,
        };
        Ok(self.register(found).await)
    }

    async fn inner_text(&self, element: ElementHandle) -> Result<Option<String>> {
        let text = self
            .element(element)
            .await?
            .inner_text()
            .await
            .context("reading element text")?;
        Ok(text.map(|t| collapse_whitespace(&t)))
    }

    async fn content(&self) -> Result<String> {
        self.page.content().await.context("reading page content")
    }

    async fn snapshot(&self, dir: &Path, label: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating snapshot dir {}", dir.display()))?;
        let stem = snapshot_stem(label);

        if let Ok(html) = self.page.content().await {
            let html_path = dir.join(format!("{stem}.html"));
            if let Err(e) = tokio::fs::write(&html_path, html).await {
                warn!("failed to write {}: {e}", html_path.display());
            }
        }

        let png = self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .context("capturing screenshot")?;
        let png_path = dir.join(format!("{stem}.png"));
        tokio::fs::write(&png_path, png)
            .await
            .with_context(|| format!("writing {}", png_path.display()))?;
        Ok(png_path)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumContext { page, disposal, .. } = *self;
        if let Err(e) = page.close().await {
            warn!("failed to close page: {e}");
        }
        disposal.run().await
    }
}
