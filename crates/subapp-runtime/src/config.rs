#![forbid(unsafe_code)]

//! Engine configuration.

use std::env;

/// Environment variable overriding [`EngineConfig::ttl`].
pub const TTL_ENV_VAR: &str = "SUBAPP_DIGEST_TTL";

/// Settings shared by every scope of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of dirty rounds a single digest may run before it
    /// gives up with [`EngineError::Unstable`](crate::EngineError::Unstable).
    pub ttl: usize,
}

impl EngineConfig {
    pub const DEFAULT_TTL: usize = 10;

    #[must_use]
    pub fn with_ttl(mut self, ttl: usize) -> Self {
        self.ttl = ttl.max(1);
        self
    }

    /// Read overrides from the process environment.
    ///
    /// A missing, unparsable or zero `SUBAPP_DIGEST_TTL` keeps the default.
    #[must_use]
    pub fn from_env() -> Self {
        let ttl = env::var(TTL_ENV_VAR).ok();
        Self::from_env_values(ttl.as_deref())
    }

    /// Pure form of [`EngineConfig::from_env`].
    #[must_use]
    pub fn from_env_values(ttl: Option<&str>) -> Self {
        let ttl = ttl
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(Self::DEFAULT_TTL);
        Self { ttl }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl: Self::DEFAULT_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_is_ten() {
        assert_eq!(EngineConfig::default().ttl, 10);
    }

    #[test]
    fn env_value_overrides_ttl() {
        assert_eq!(EngineConfig::from_env_values(Some(" 25 ")).ttl, 25);
    }

    #[test]
    fn invalid_env_values_fall_back() {
        assert_eq!(EngineConfig::from_env_values(None).ttl, 10);
        assert_eq!(EngineConfig::from_env_values(Some("lots")).ttl, 10);
        assert_eq!(EngineConfig::from_env_values(Some("0")).ttl, 10);
        assert_eq!(EngineConfig::from_env_values(Some("-3")).ttl, 10);
    }

    #[test]
    fn with_ttl_clamps_to_one() {
        assert_eq!(EngineConfig::default().with_ttl(0).ttl, 1);
        assert_eq!(EngineConfig::default().with_ttl(4).ttl, 4);
    }
}
