//! Process configuration loaded from the environment.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

/// Lowest price kept in a sample. Filters shipping fragments and placeholder zeros.
pub const MIN_PRICE: f64 = 10.0;
/// Highest price kept in a sample. Filters multi-item lot aggregates.
pub const MAX_PRICE: f64 = 10_000.0;
/// A tier is usable once it yields at least this many candidates.
pub const USABLE_CANDIDATES: usize = 5;
/// Observation rows sent per insert request.
pub const INSERT_BATCH_SIZE: usize = 50;
/// Concurrent pipelines in batch mode unless the caller asks otherwise.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;
/// Hard ceiling on concurrent pipelines.
pub const MAX_CONCURRENT_CEILING: usize = 5;
/// Most queries accepted in one batch request.
pub const MAX_BATCH_QUERIES: usize = 20;
/// Pause between queries of a scheduled sweep.
pub const DEFAULT_QUERY_DELAY_SECS: u64 = 8;
/// Default navigation timeout.
pub const DEFAULT_NAV_TIMEOUT_MS: u64 = 30_000;
/// Default wait for listing containers after navigation.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 10_000;
/// Sold-listings search endpoint.
pub const DEFAULT_MARKET_URL: &str = "https://www.ebay.com/sch/i.html";
/// Desktop user agent presented by both renderers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Which page renderer drives extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    /// Headless Chrome via the DevTools protocol.
    Chromium,
    /// Plain HTTP fetch, no JavaScript.
    Http,
}

/// Credentials for the remote record store (a PostgREST endpoint).
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub url: String,
    pub key: String,
}

impl std::fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Browser launch settings.
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub chrome_path: Option<PathBuf>,
    pub headless: bool,
    pub window_size: (u32, u32),
    pub user_agent: String,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            window_size: (1366, 900),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Everything the binary needs to build a pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Present only when both store variables are set.
    pub store: Option<StoreCredentials>,
    pub market_url: String,
    pub renderer: RendererKind,
    pub browser: BrowserSettings,
    pub nav_timeout_ms: u64,
    pub wait_timeout_ms: u64,
    pub snapshot_dir: Option<PathBuf>,
    pub query_delay: Duration,
    pub max_concurrent: usize,
    pub run_log: PathBuf,
    pub catalog_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let key = get("SUPABASE_SERVICE_ROLE_KEY").or_else(|| get("SUPABASE_ANON_KEY"));
        let store = match (get("SUPABASE_URL"), key) {
            (Some(url), Some(key)) => Some(StoreCredentials {
                url: url.trim_end_matches('/').to_string(),
                key,
            }),
            _ => None,
        };

        let renderer = match get("PRICEWATCH_RENDERER").as_deref() {
            None | Some("chromium") | Some("chrome") => RendererKind::Chromium,
            Some("http") => RendererKind::Http,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "PRICEWATCH_RENDERER",
                    value: other.to_string(),
                    reason: "expected 'chromium' or 'http'".to_string(),
                })
            }
        };

        let browser = BrowserSettings {
            chrome_path: get("PRICEWATCH_CHROME_PATH").map(PathBuf::from),
            headless: !parse_flag(get("PRICEWATCH_HEADFUL")),
            ..BrowserSettings::default()
        };

        let max_concurrent = parse_number(
            "PRICEWATCH_MAX_CONCURRENT",
            get("PRICEWATCH_MAX_CONCURRENT"),
            DEFAULT_MAX_CONCURRENT as u64,
        )? as usize;

        Ok(Self {
            store,
            market_url: get("PRICEWATCH_MARKET_URL").unwrap_or_else(|| DEFAULT_MARKET_URL.to_string()),
            renderer,
            browser,
            nav_timeout_ms: parse_number(
                "PRICEWATCH_NAV_TIMEOUT_MS",
                get("PRICEWATCH_NAV_TIMEOUT_MS"),
                DEFAULT_NAV_TIMEOUT_MS,
            )?,
            wait_timeout_ms: parse_number(
                "PRICEWATCH_WAIT_TIMEOUT_MS",
                get("PRICEWATCH_WAIT_TIMEOUT_MS"),
                DEFAULT_WAIT_TIMEOUT_MS,
            )?,
            snapshot_dir: Some(
                get("PRICEWATCH_SNAPSHOT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| pricewatch_home().join("snapshots")),
            ),
            query_delay: Duration::from_secs(parse_number(
                "PRICEWATCH_QUERY_DELAY_SECS",
                get("PRICEWATCH_QUERY_DELAY_SECS"),
                DEFAULT_QUERY_DELAY_SECS,
            )?),
            max_concurrent: clamp_concurrency(max_concurrent),
            run_log: get("PRICEWATCH_RUN_LOG")
                .map(PathBuf::from)
                .unwrap_or_else(|| pricewatch_home().join("runs.jsonl")),
            catalog_path: get("PRICEWATCH_CATALOG").map(PathBuf::from),
        })
    }

    /// Store credentials, or a fatal error when persistence was requested without them.
    pub fn require_store(&self) -> Result<&StoreCredentials, ConfigError> {
        self.store
            .as_ref()
            .ok_or(ConfigError::Missing("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY"))
    }
}

/// Clamp a requested concurrency into `1..=MAX_CONCURRENT_CEILING`.
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(1, MAX_CONCURRENT_CEILING)
}

/// Get the pricewatch home directory (~/.pricewatch).
pub fn pricewatch_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".pricewatch")
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(
        value.as_deref().map(str::to_ascii_lowercase).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

fn parse_number(name: &'static str, value: Option<String>, default: u64) -> Result<u64, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            name,
            value: v.clone(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_without_store() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(config.store.is_none());
        assert_eq!(config.renderer, RendererKind::Chromium);
        assert_eq!(config.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(config.query_delay, Duration::from_secs(8));
        assert_eq!(config.market_url, DEFAULT_MARKET_URL);
        assert!(config.browser.headless);
        assert!(matches!(config.require_store(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_store_credentials_with_anon_fallback() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abc.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
        ]))
        .unwrap();
        let creds = config.require_store().unwrap();
        assert_eq!(creds.url, "https://abc.supabase.co");
        assert_eq!(creds.key, "anon");
    }

    #[test]
    fn test_service_role_key_preferred() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]))
        .unwrap();
        assert_eq!(config.require_store().unwrap().key, "service");
    }

    #[test]
    fn test_concurrency_clamped_to_ceiling() {
        let config = Config::from_lookup(lookup(&[("PRICEWATCH_MAX_CONCURRENT", "50")])).unwrap();
        assert_eq!(config.max_concurrent, MAX_CONCURRENT_CEILING);
        assert_eq!(clamp_concurrency(0), 1);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = Config::from_lookup(lookup(&[("PRICEWATCH_RENDERER", "firefox")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PRICEWATCH_RENDERER", .. }));

        let err = Config::from_lookup(lookup(&[("PRICEWATCH_NAV_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_http_renderer_and_headful() {
        let config = Config::from_lookup(lookup(&[
            ("PRICEWATCH_RENDERER", "http"),
            ("PRICEWATCH_HEADFUL", "true"),
        ]))
        .unwrap();
        assert_eq!(config.renderer, RendererKind::Http);
        assert!(!config.browser.headless);
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = StoreCredentials {
            url: "https://x".into(),
            key: "secret".into(),
        };
        assert!(!format!("{creds:?}").contains("secret"));
    }
}
