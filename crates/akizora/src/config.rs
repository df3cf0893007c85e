//! Compile and render settings.

use serde::Deserialize;

/// Include nesting allowed before execution fails
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 64;

/// What a path naming an absent map key evaluates to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// Fail with `FieldNotFound`
    #[default]
    Error,
    /// Evaluate to null, which prints as the empty string
    EmptyString,
}

/// Compile and execution options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub missing_key: MissingKeyPolicy,
    pub max_include_depth: usize,
    /// When false, outputs are written unescaped and the context analyzer is skipped
    pub autoescape: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            missing_key: MissingKeyPolicy::Error,
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            autoescape: true,
        }
    }
}

impl Config {
    pub fn with_missing_key(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key = policy;
        self
    }

    pub fn with_max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    pub fn with_autoescape(mut self, autoescape: bool) -> Self {
        self.autoescape = autoescape;
        self
    }
}
