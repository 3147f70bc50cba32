//! Runtime heap configuration.
//!
//! Read from the environment on first use:
//! - `ERMALLOC_MODE`: `enforcing` (default) honors policy chains on protected
//!   entry points; `passthrough` ignores them and routes everything to the raw
//!   allocator, for benchmarking baselines.
//! - `ERMALLOC_REDUNDANCY_COPIES`: copy count used when a caller requests
//!   redundancy without specifying one. Clamped to the accepted range.

use std::sync::OnceLock;

use ermalloc_core::{Policy, RedundancyPolicy};

/// Environment variable selecting [`HeapMode`].
pub const MODE_VAR: &str = "ERMALLOC_MODE";
/// Environment variable selecting the default redundancy copy count.
pub const COPIES_VAR: &str = "ERMALLOC_REDUNDANCY_COPIES";

/// Operating mode of the protected entry points.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapMode {
    /// Policy chains are applied.
    #[default]
    Enforcing,
    /// Chains are ignored; every call behaves like the raw allocator.
    Passthrough,
}

impl HeapMode {
    /// Parse from string (case-insensitive). Unknown values select the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" | "off" | "none" | "raw" => Self::Passthrough,
            _ => Self::Enforcing,
        }
    }

    /// Returns true if protected entry points apply chains.
    #[must_use]
    pub const fn protects(self) -> bool {
        matches!(self, Self::Enforcing)
    }
}

/// Heap settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub mode: HeapMode,
    /// Copies used for redundancy without an explicit count.
    pub default_copies: u8,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            mode: HeapMode::default(),
            default_copies: RedundancyPolicy::DEFAULT_COPIES,
        }
    }
}

impl HeapConfig {
    /// Build from raw variable values.
    #[must_use]
    pub fn from_vars(mode: Option<&str>, copies: Option<&str>) -> Self {
        let mode = mode.map(HeapMode::from_str_loose).unwrap_or_default();
        let default_copies = copies
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|n| {
                n.clamp(
                    u32::from(RedundancyPolicy::MIN_COPIES),
                    u32::from(RedundancyPolicy::MAX_COPIES),
                ) as u8
            })
            .unwrap_or(RedundancyPolicy::DEFAULT_COPIES);
        Self {
            mode,
            default_copies,
        }
    }

    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mode = std::env::var(MODE_VAR).ok();
        let copies = std::env::var(COPIES_VAR).ok();
        Self::from_vars(mode.as_deref(), copies.as_deref())
    }

    /// Redundancy policy with the configured default copy count.
    #[must_use]
    pub fn default_redundancy(&self) -> Policy {
        Policy::redundancy(u32::from(self.default_copies)).unwrap_or_else(|_| Policy::tmr())
    }
}

static GLOBAL_CONFIG: OnceLock<HeapConfig> = OnceLock::new();

/// Get the process configuration (reads env vars on first call, caches thereafter).
#[must_use]
pub fn heap_config() -> HeapConfig {
    *GLOBAL_CONFIG.get_or_init(HeapConfig::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!(HeapMode::from_str_loose("enforcing"), HeapMode::Enforcing);
        assert_eq!(HeapMode::from_str_loose("ENFORCING"), HeapMode::Enforcing);
        assert_eq!(
            HeapMode::from_str_loose("passthrough"),
            HeapMode::Passthrough
        );
        assert_eq!(HeapMode::from_str_loose(" off "), HeapMode::Passthrough);
        assert_eq!(HeapMode::from_str_loose("bogus"), HeapMode::Enforcing);
    }

    #[test]
    fn only_enforcing_protects() {
        assert!(HeapMode::Enforcing.protects());
        assert!(!HeapMode::Passthrough.protects());
    }

    #[test]
    fn defaults_without_vars() {
        let config = HeapConfig::from_vars(None, None);
        assert_eq!(config, HeapConfig::default());
        assert_eq!(config.default_redundancy(), Policy::tmr());
    }

    #[test]
    fn copies_are_clamped() {
        assert_eq!(HeapConfig::from_vars(None, Some("5")).default_copies, 5);
        assert_eq!(HeapConfig::from_vars(None, Some("1")).default_copies, 2);
        assert_eq!(HeapConfig::from_vars(None, Some("99")).default_copies, 15);
        assert_eq!(HeapConfig::from_vars(None, Some("x")).default_copies, 3);
    }

    #[test]
    fn default_redundancy_uses_configured_copies() {
        let config = HeapConfig::from_vars(Some("enforcing"), Some("7"));
        assert_eq!(config.default_redundancy(), Policy::redundancy(7).unwrap());
    }
}
