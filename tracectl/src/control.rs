// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runtime control of log levels.

use crate::LevelFilter;
use crate::targets::{TRACING_TARGETS, TraceTarget};
use ordermap::OrderMap;
use parking_lot::Mutex;
use std::fmt::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

pub const DEFAULT_DEFAULT_LOGLEVEL: LevelFilter = LevelFilter::INFO;

#[derive(Debug, thiserror::Error)]
pub enum TraceCtlError {
    #[error("Unknown tracing target or tag '{0}'")]
    UnknownTarget(String),
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Invalid tracing directive '{0}': expected tag=level")]
    InvalidDirective(String),
    #[error("Failed to reload tracing filter: {0}")]
    ReloadError(String),
}

struct TracingState {
    default: LevelFilter,
    levels: OrderMap<&'static str, LevelFilter>,
}

/// Owns the reloadable filter of the process-wide subscriber.
pub struct TracingControl {
    handle: Option<reload::Handle<EnvFilter, Registry>>,
    state: Mutex<TracingState>,
}

static TRACE_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get the tracing control object, installing the global subscriber on first use.
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACE_CTL.get_or_init(TracingControl::new)
}

impl TracingControl {
    fn new() -> Self {
        let levels = TRACING_TARGETS
            .iter()
            .map(|t| (t.module, t.default))
            .collect();
        let state = TracingState {
            default: DEFAULT_DEFAULT_LOGLEVEL,
            levels,
        };
        let (filter, handle) = reload::Layer::new(Self::build_filter(&state));
        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init();
        // another subscriber (e.g. a test harness) already owns the process
        let handle = installed.ok().map(|()| handle);
        Self {
            handle,
            state: Mutex::new(state),
        }
    }

    fn build_filter(state: &TracingState) -> EnvFilter {
        let mut directives = state.default.to_string();
        for (module, level) in &state.levels {
            let _ = write!(directives, ",{module}={level}");
        }
        EnvFilter::new(directives)
    }

    fn reload(&self, state: &TracingState) -> Result<(), TraceCtlError> {
        match &self.handle {
            None => Ok(()),
            Some(handle) => handle
                .reload(Self::build_filter(state))
                .map_err(|e| TraceCtlError::ReloadError(e.to_string())),
        }
    }

    fn targets_for(tag: &str) -> impl Iterator<Item = &'static TraceTarget> + '_ {
        TRACING_TARGETS.iter().filter(move |t| t.answers_to(tag))
    }

    pub fn set_default_level(&self, level: LevelFilter) -> Result<(), TraceCtlError> {
        let mut state = self.state.lock();
        state.default = level;
        self.reload(&state)
    }

    /// Set the level of every target answering to `tag`.
    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) -> Result<(), TraceCtlError> {
        let mut state = self.state.lock();
        let mut found = false;
        for target in Self::targets_for(tag) {
            state.levels.insert(target.module, level);
            found = true;
        }
        if !found {
            return Err(TraceCtlError::UnknownTarget(tag.to_string()));
        }
        self.reload(&state)
    }

    /// Apply a configuration string such as `default=warn,all=info,routing=debug`.
    pub fn setup_from_string(&self, config: &str) -> Result<(), TraceCtlError> {
        for directive in config.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            let (tag, level) = directive
                .split_once('=')
                .ok_or_else(|| TraceCtlError::InvalidDirective(directive.to_string()))?;
            let level = LevelFilter::from_str(level.trim())
                .map_err(|_| TraceCtlError::InvalidLevel(level.to_string()))?;
            match tag.trim() {
                "default" => self.set_default_level(level)?,
                "all" => {
                    let mut state = self.state.lock();
                    for level_of in state.levels.values_mut() {
                        *level_of = level;
                    }
                    self.reload(&state)?;
                }
                tag => self.set_tag_level(tag, level)?,
            }
        }
        Ok(())
    }

    /// Current level of a target by its name.
    #[must_use]
    pub fn level_of(&self, name: &str) -> Option<LevelFilter> {
        let state = self.state.lock();
        TRACING_TARGETS
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| state.levels.get(t.module).copied())
    }

    /// Human readable table of all targets and their current levels.
    #[must_use]
    pub fn as_string(&self) -> String {
        let state = self.state.lock();
        let mut out = format!("default: {}\n", state.default);
        for target in TRACING_TARGETS {
            let level = state
                .levels
                .get(target.module)
                .copied()
                .unwrap_or(target.default);
            let _ = writeln!(
                out,
                "{:<24} {:<6} {} [{}]",
                target.name,
                level,
                target.module,
                target.tags.join(",")
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    crate::trace_target!("control-test", LevelFilter::ERROR, &["ctl"]);

    #[test]
    #[serial]
    fn setup_from_string_adjusts_levels() {
        let ctl = get_trace_ctl();
        ctl.setup_from_string("default=warn, ctl=debug").unwrap();
        assert_eq!(ctl.level_of("control-test"), Some(LevelFilter::DEBUG));
        ctl.setup_from_string("all=trace").unwrap();
        assert_eq!(ctl.level_of("control-test"), Some(LevelFilter::TRACE));
        assert!(ctl.as_string().contains("control-test"));
    }

    #[test]
    #[serial]
    fn bad_directives_are_rejected() {
        let ctl = get_trace_ctl();
        assert!(matches!(
            ctl.setup_from_string("nonsense"),
            Err(TraceCtlError::InvalidDirective(_))
        ));
        assert!(matches!(
            ctl.setup_from_string("ctl=loud"),
            Err(TraceCtlError::InvalidLevel(_))
        ));
        assert!(matches!(
            ctl.setup_from_string("no-such-target=info"),
            Err(TraceCtlError::UnknownTarget(_))
        ));
    }
}
