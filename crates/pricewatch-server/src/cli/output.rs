//! Shared CLI output formatting with colors, symbols, and structured display.

use pricewatch::{BatchReport, ScrapeReport, SyncStatus};
use serde::Serialize;
use std::io::IsTerminal;

/// Check if color output is enabled.
pub fn color_enabled() -> bool {
    // https://no-color.org/
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stderr().is_terminal()
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const DIM: &str = "\x1b[2m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Colored string builder.
pub struct Styled {
    use_color: bool,
}

impl Default for Styled {
    fn default() -> Self {
        Self::new()
    }
}

impl Styled {
    /// Colors on when stderr is a terminal and `NO_COLOR` is unset.
    pub fn new() -> Self {
        Self {
            use_color: color_enabled(),
        }
    }

    /// Never colored.
    pub fn plain() -> Self {
        Self { use_color: false }
    }

    /// Green checkmark symbol.
    pub fn ok_sym(&self) -> &str {
        if self.use_color {
            "\x1b[32m\u{2713}\x1b[0m"
        } else {
            "OK"
        }
    }

    /// Red X symbol.
    pub fn fail_sym(&self) -> &str {
        if self.use_color {
            "\x1b[31m\u{2717}\x1b[0m"
        } else {
            "!!"
        }
    }

    /// Yellow warning symbol.
    pub fn warn_sym(&self) -> &str {
        if self.use_color {
            "\x1b[33m\u{26a0}\x1b[0m"
        } else {
            "??"
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.use_color {
            format!("{code}{s}{RESET}")
        } else {
            s.to_string()
        }
    }

    pub fn green(&self, s: &str) -> String {
        self.paint(GREEN, s)
    }

    pub fn red(&self, s: &str) -> String {
        self.paint(RED, s)
    }

    pub fn yellow(&self, s: &str) -> String {
        self.paint(YELLOW, s)
    }

    pub fn dim(&self, s: &str) -> String {
        self.paint(DIM, s)
    }

    pub fn bold(&self, s: &str) -> String {
        self.paint(BOLD, s)
    }
}

/// Print a branded header for CLI output.
pub fn print_header(s: &Styled) {
    eprintln!(
        "  {} {}",
        s.bold("pricewatch"),
        s.dim(&format!("v{}", env!("CARGO_PKG_VERSION")))
    );
    eprintln!();
}

/// Bold section title.
pub fn print_section(s: &Styled, title: &str) {
    eprintln!("  {}", s.bold(title));
}

/// Print a check result line with symbol and label/value.
pub fn print_check(symbol: &str, label: &str, value: &str) {
    eprintln!("    {symbol} {label:<16} {value}");
}

/// Print an indented detail line under a check.
pub fn print_detail(msg: &str) {
    eprintln!("                        {msg}");
}

/// Final status line after a blank line.
pub fn print_status(s: &Styled, status: &str, msg: &str) {
    eprintln!();
    eprintln!("  {}: {status} ({msg})", s.bold("Status"));
}

/// Format a duration in seconds into human-readable (e.g., "2m 14s").
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let m = secs / 60;
        let s = secs % 60;
        format!("{m}m {s}s")
    } else {
        let h = secs / 3600;
        let m = (secs % 3600) / 60;
        format!("{h}h {m}m")
    }
}

/// Dollar amount with two decimals and thousands separators.
pub fn format_price(value: f64) -> String {
    let cents = (value * 100.0).round() as i64;
    let (whole, frac) = (cents.abs() / 100, cents.abs() % 100);
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}${grouped}.{frac:02}")
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn sync_label(s: &Styled, status: SyncStatus) -> String {
    match status {
        SyncStatus::NotRequested => s.dim("not requested"),
        SyncStatus::Success => s.green("stored"),
        SyncStatus::NoData => s.yellow("no data"),
        SyncStatus::Error => s.red("error"),
    }
}

/// Human-readable block for one query.
pub fn print_scrape_report(s: &Styled, report: &ScrapeReport) {
    print_section(s, &report.query);
    if report.price_count == 0 {
        print_check(s.warn_sym(), "Prices", "none found");
    } else {
        print_check(s.ok_sym(), "Prices", &report.price_count.to_string());
        print_check(" ", "Average", &format_price(report.average));
        print_check(" ", "Median", &format_price(report.median_price));
        print_check(
            " ",
            "Range",
            &format!(
                "{} to {}",
                format_price(report.lowest_price),
                format_price(report.highest_price)
            ),
        );
    }

    let sym = match report.sync_status {
        SyncStatus::Error => s.fail_sym(),
        SyncStatus::NoData => s.warn_sym(),
        _ => s.ok_sym(),
    };
    print_check(sym, "Storage", &sync_label(s, report.sync_status));
    if let Some(outcome) = &report.storage_result {
        if outcome.card_created {
            print_detail(&format!("created card {}", outcome.card_id.unwrap_or_default()));
        }
        if outcome.entries_inserted > 0 {
            print_detail(&format!("{} observations written", outcome.entries_inserted));
        }
        for err in &outcome.errors {
            print_detail(&s.red(err));
        }
    }
    if let Some(trace) = &report.debug {
        let tier = trace.tier_used.map(|t| t.as_str()).unwrap_or("merged");
        print_detail(&s.dim(&format!("tier {tier}, {}ms", trace.elapsed_ms)));
        for note in &trace.notes {
            print_detail(&s.dim(note));
        }
        for err in &trace.errors {
            print_detail(&s.yellow(err));
        }
    }
}

/// Per-query lines plus totals for a batch or scheduled run.
pub fn print_batch_report(s: &Styled, report: &BatchReport) {
    print_section(s, "Results");
    for outcome in &report.results {
        match (&outcome.data, &outcome.error) {
            (Some(data), None) => print_check(
                s.ok_sym(),
                &outcome.query,
                &format!("{} prices, avg {}", data.price_count, format_price(data.average)),
            ),
            (_, Some(err)) => print_check(s.fail_sym(), &outcome.query, &s.red(err)),
            (None, None) => print_check(s.warn_sym(), &outcome.query, "no result"),
        }
    }

    let summary = &report.batch_summary;
    eprintln!();
    print_section(s, "Summary");
    print_check(" ", "Queries", &summary.total_queries.to_string());
    print_check(" ", "Prices found", &summary.total_prices_found.to_string());
    print_check(" ", "Prices stored", &summary.total_prices_stored.to_string());
    print_check(" ", "Cards created", &summary.cards_created.to_string());
    print_check(" ", "Concurrency", &summary.max_concurrent.to_string());

    let status = if summary.failed == 0 {
        s.green("ok")
    } else {
        s.yellow("partial")
    };
    print_status(
        s,
        &status,
        &format!(
            "{}/{} successful in {}",
            summary.successful,
            summary.total_queries,
            format_duration(summary.duration_seconds.round() as u64)
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(162.5), "$162.50");
        assert_eq!(format_price(9999.999), "$10,000.00");
        assert_eq!(format_price(1234567.0), "$1,234,567.00");
        assert_eq!(format_price(0.0), "$0.00");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(134), "2m 14s");
        assert_eq!(format_duration(8040), "2h 14m");
    }

    #[test]
    fn test_plain_styles_have_no_escapes() {
        let s = Styled::plain();
        assert_eq!(s.red("x"), "x");
        assert_eq!(s.ok_sym(), "OK");
    }
}
