// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Registry of tracing targets declared across the workspace.
//!
//! Every crate (or module) that wants its log level to be tunable at runtime declares
//! a target with [`trace_target!`](crate::trace_target).  Declarations land in a
//! link-time distributed slice, so the control object can enumerate all of them
//! without any explicit registration call.

use crate::LevelFilter;
use linkme::distributed_slice;

/// A tunable tracing target.
#[derive(Debug)]
pub struct TraceTarget {
    /// Short name used on the command line (e.g. `routing`)
    pub name: &'static str,
    /// Module path whose events this target governs
    pub module: &'static str,
    /// Level applied until somebody changes it
    pub default: LevelFilter,
    /// Additional names this target answers to
    pub tags: &'static [&'static str],
}

impl TraceTarget {
    #[must_use]
    pub const fn new(
        name: &'static str,
        module: &'static str,
        default: LevelFilter,
        tags: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            module,
            default,
            tags,
        }
    }

    #[must_use]
    pub fn answers_to(&self, tag: &str) -> bool {
        self.name == tag || self.tags.contains(&tag)
    }
}

#[distributed_slice]
pub static TRACING_TARGETS: [TraceTarget];

/// Declare a tunable tracing target for the invoking module.
///
/// ```ignore
/// trace_target!("routing", LevelFilter::INFO, &["kernel"]);
/// ```
#[macro_export]
macro_rules! trace_target {
    ($name:expr, $level:expr, $tags:expr) => {
        const _: () = {
            #[allow(unused_imports)]
            use $crate::LevelFilter;
            #[$crate::linkme::distributed_slice($crate::targets::TRACING_TARGETS)]
            #[linkme(crate = $crate::linkme)]
            static TRACE_TARGET: $crate::targets::TraceTarget =
                $crate::targets::TraceTarget::new($name, module_path!(), $level, $tags);
        };
    };
}
