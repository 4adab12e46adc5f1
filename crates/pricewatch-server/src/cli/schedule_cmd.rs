//! `pricewatch schedule`: sweep a catalog sequentially, once or on a fixed period.

use crate::app::build_orchestrator;
use crate::cli::output::{format_duration, print_batch_report, print_header, print_json, Styled};
use anyhow::{Context, Result};
use pricewatch::{default_catalog, Catalog, Config, RunOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct ScheduleArgs {
    pub catalog: Option<PathBuf>,
    pub delay_secs: Option<u64>,
    pub no_store: bool,
    pub every_secs: Option<u64>,
}

/// Catalog from an explicit file, then `PRICEWATCH_CATALOG`, then the built-in list.
pub fn load_catalog(explicit: Option<&Path>, config: &Config) -> Result<Catalog> {
    match explicit.or(config.catalog_path.as_deref()) {
        Some(path) => Catalog::from_json_file(path)
            .with_context(|| format!("loading catalog {}", path.display())),
        None => Ok(default_catalog()),
    }
}

/// Sweep the catalog, once or every `every_secs`.
pub async fn run(config: &Config, args: ScheduleArgs, json: bool) -> Result<()> {
    let catalog = load_catalog(args.catalog.as_deref(), config)?;
    let delay = args
        .delay_secs
        .map(Duration::from_secs)
        .unwrap_or(config.query_delay);
    let store = !args.no_store;
    let orchestrator = build_orchestrator(config, store).await?;
    let options = RunOptions { store, debug: false };

    let s = Styled::new();
    if !json {
        print_header(&s);
    }

    loop {
        let report = orchestrator.run_catalog(&catalog, delay, options).await;
        if json {
            print_json(&report)?;
        } else {
            print_batch_report(&s, &report);
        }

        let Some(every) = args.every_secs else {
            return Ok(());
        };
        info!(next_in = %format_duration(every), "waiting for next scheduled run");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(every)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; stopping schedule");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    #[test]
    fn test_default_catalog_when_unset() {
        let catalog = load_catalog(None, &config()).unwrap();
        assert_eq!(catalog.len(), default_catalog().len());
    }

    #[test]
    fn test_explicit_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graded.json");
        std::fs::write(&path, r#"["Charizard PSA 10", "Pikachu PSA 9"]"#).unwrap();

        let catalog = load_catalog(Some(&path), &config()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.name, "graded");
    }

    #[test]
    fn test_missing_catalog_file_is_error() {
        let err = load_catalog(Some(Path::new("/nonexistent/catalog.json")), &config()).unwrap_err();
        assert!(format!("{err:#}").contains("loading catalog"));
    }
}
