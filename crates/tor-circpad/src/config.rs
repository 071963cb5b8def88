//! Developer-facing override switches (§6.3, §10.4).
//!
//! These are knobs for testing and local experimentation, not a
//! persisted or torrc-style configuration surface (§6.4: this crate
//! keeps no persisted state of its own).

use derive_builder::Builder;

use crate::machine::OverheadCaps;

/// Engine-wide overrides (§6.3).
#[derive(Clone, Debug, Builder, PartialEq, Eq)]
#[builder(build_fn(error = "ConfigBuildError"))]
pub struct Config {
    /// Master switch: if false, the activation controller never installs
    /// a machine, regardless of registered specs or conditions.
    #[builder(default = "true")]
    pub padding_enabled: bool,

    /// If set, overrides every registered machine's own overhead caps
    /// with this single value, in addition to the global cap already
    /// enforced by the overhead governor (§10.4).
    #[builder(default)]
    pub overhead_override: Option<OverheadCaps>,

    /// Bypass [`crate::circuit::CircuitSnapshot::hop_supports_machine`]
    /// checks entirely; for interoperability testing against peers whose
    /// subprotocol advertisement is known to be wrong (§10.4).
    #[builder(default = "false")]
    pub ignore_support_advertisement: bool,
}

impl Config {
    /// Return a new builder for [`Config`].
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build().expect("default config is always valid")
    }
}

/// Error building a [`Config`].
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A required field was missing or a validator rejected a value.
    #[error("invalid padding engine configuration: {0}")]
    Invalid(String),
}

impl From<derive_builder::UninitializedFieldError> for ConfigBuildError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        ConfigBuildError::Invalid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn default_config_allows_padding() {
        let cfg = Config::default();
        assert!(cfg.padding_enabled);
        assert!(!cfg.ignore_support_advertisement);
        assert!(cfg.overhead_override.is_none());
    }

    #[test]
    fn builder_overrides_individual_fields() {
        let cfg = Config::builder()
            .padding_enabled(false)
            .ignore_support_advertisement(true)
            .build()
            .unwrap();
        assert!(!cfg.padding_enabled);
        assert!(cfg.ignore_support_advertisement);
    }
}
