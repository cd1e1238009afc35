//! Logging bootstrap.
//!
//! - Text or JSON output, RFC3339 (UTC) timestamps.
//! - EnvFilter: explicit directive string, else `RUST_LOG`, else [`DEFAULT_DIRECTIVE`].
//! - Components log under `launchpad::{vault,registry,sale,access}` targets and can be
//!   tuned one by one through `components`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{
    filter::Directive, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

/// Sale progress (allocations, KYC) at debug, everything else at info.
pub const DEFAULT_DIRECTIVE: &str = "info,launchpad::sale=debug";

const TARGET_ROOT: &str = "launchpad";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directives, e.g. "info,launchpad::sale=debug". `None` reads `RUST_LOG`.
    pub env_filter: Option<String>,
    /// Per-component level, e.g. `vault = "trace"`. Applied on top of the filter.
    pub components: BTreeMap<String, String>,
    pub json: bool,
    /// Print target, file and line.
    pub with_targets_and_lines: bool,
    pub with_threads: bool,
    /// ANSI colors; text format only.
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            components: BTreeMap::new(),
            json: true,
            with_targets_and_lines: true,
            with_threads: false,
            ansi: false,
        }
    }
}

/// Keeps logging alive for the lifetime of the process.
#[derive(Debug)]
pub struct LoggingGuard {
    _priv: (),
}

/// Unparsable directives fall back to [`DEFAULT_DIRECTIVE`]; unparsable
/// component levels are skipped.
pub fn build_filter(cfg: &LoggingConfig) -> EnvFilter {
    let base = match &cfg.env_filter {
        Some(s) => EnvFilter::try_new(s.as_str()).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    };
    let mut filter = base.unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE));
    for (component, level) in &cfg.components {
        let directive = format!("{TARGET_ROOT}::{component}={level}");
        if let Ok(d) = directive.parse::<Directive>() {
            filter = filter.add_directive(d);
        }
    }
    filter
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let filter = build_filter(cfg);

    let fmt_layer = {
        let base = fmt::layer()
            .with_target(cfg.with_targets_and_lines)
            .with_file(cfg.with_targets_and_lines)
            .with_line_number(cfg.with_targets_and_lines)
            .with_thread_ids(cfg.with_threads)
            .with_thread_names(cfg.with_threads)
            .with_timer(fmt::time::UtcTime::rfc_3339());

        if cfg.json {
            base.json()
                .with_ansi(false)
                .with_current_span(true)
                .with_span_list(true)
                .flatten_event(true)
                .boxed()
        } else {
            base.with_ansi(cfg.ansi).boxed()
        }
    };

    Registry::default().with(filter).with(fmt_layer).try_init()?;
    tracing::info!(
        target: TARGET_ROOT,
        json = cfg.json,
        components = cfg.components.len(),
        "logging initialized"
    );
    Ok(LoggingGuard { _priv: () })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn bad_directive_falls_back_to_launchpad_default() {
        let cfg = LoggingConfig { env_filter: Some("launchpad=loud".into()), ..Default::default() };
        let filter = build_filter(&cfg);
        assert!(filter.to_string().contains("launchpad::sale=debug"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let cfg = LoggingConfig { env_filter: Some("warn".into()), ..Default::default() };
        assert_eq!(build_filter(&cfg).to_string(), "warn");
    }

    #[test]
    fn component_levels_extend_the_filter() {
        let mut components = BTreeMap::new();
        components.insert("vault".to_string(), "trace".to_string());
        components.insert("sale".to_string(), "loud".to_string());
        let cfg = LoggingConfig {
            env_filter: Some("warn".into()),
            components,
            ..Default::default()
        };
        let filter = build_filter(&cfg);
        let rendered = filter.to_string();
        assert!(rendered.contains("launchpad::vault=trace"));
        assert!(!rendered.contains("launchpad::sale"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn second_init_fails() {
        let cfg = LoggingConfig {
            env_filter: Some("warn".into()),
            json: false,
            ..Default::default()
        };
        let _ = init(&cfg);
        assert!(init(&cfg).is_err());
    }
}
