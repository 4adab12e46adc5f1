//! Page rendering seam.
//!
//! The extractor needs only a handful of capabilities from a browser:
//! navigate with a load signal, query elements (optionally scoped to an
//! earlier element), read rendered text, and dump the page for
//! diagnostics. [`RenderContext`] is that contract; [`Renderer`] hands out
//! one isolated context per pipeline.

pub mod chromium;
pub mod static_html;

pub use chromium::ChromiumRenderer;
pub use static_html::{HttpRenderer, StaticContext};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Opaque reference to an element found in a [`RenderContext`].
///
/// Only valid for the context that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub(crate) usize);

/// Outcome of a completed navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// URL after redirects.
    pub final_url: String,
    /// HTTP status when the renderer can observe it.
    pub status: Option<u16>,
    /// Time until the load signal fired.
    pub load_time_ms: u64,
}

/// A single isolated page session.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Navigate and wait for the load signal, failing after `timeout_ms`.
    async fn navigate(&mut self, url: &str, timeout_ms: u64) -> Result<NavigationResult>;

    /// Wait until `selector` matches something. `Ok(false)` on timeout.
    async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool>;

    /// All elements matching `selector`, searched under `scope` when given.
    async fn query_selector_all(
        &self,
        selector: &str,
        scope: Option<ElementHandle>,
    ) -> Result<Vec<ElementHandle>>;

    /// Rendered text of an element, whitespace-collapsed.
    async fn inner_text(&self, element: ElementHandle) -> Result<Option<String>>;

    /// Full markup of the current document.
    async fn content(&self) -> Result<String>;

    /// Write diagnostic files for the current page into `dir`; returns the primary file.
    async fn snapshot(&self, dir: &Path, label: &str) -> Result<PathBuf>;

    /// Release the context and everything it holds.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Factory for isolated render contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;

    /// Short name for logs and health output.
    fn name(&self) -> &'static str;
}

/// File stem for a diagnostic snapshot: slugged label plus a UTC timestamp.
pub fn snapshot_stem(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    let mut last_dash = true;
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "page" } else { slug };
    format!("{slug}-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f"))
}

/// Collapse runs of whitespace the way a browser's `innerText` does for inline text.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_stem_slugs_label() {
        let stem = snapshot_stem("Charizard PSA 10!");
        assert!(stem.starts_with("charizard-psa-10-"), "{stem}");
    }

    #[test]
    fn test_snapshot_stem_empty_label() {
        assert!(snapshot_stem("  ").starts_with("page-"));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  $1,200.00\n\t to  $3 "), "$1,200.00 to $3");
    }
}
