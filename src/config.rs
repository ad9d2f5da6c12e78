use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const CAPACITY_VAR: &str = "SAFEALLOC_CAPACITY";
pub const ON_FAILURE_VAR: &str = "SAFEALLOC_ON_FAILURE";

/// What to do when the C allocator cannot satisfy an allocation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Report the failure and hand an [`Error::AllocationFailed`] back
    #[default]
    Return,
    /// Report the failure and `abort()` the process on the spot
    Abort,
}

impl FailurePolicy {
    fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "return" => Ok(Self::Return),
            "abort" => Ok(Self::Abort),
            other => Err(Error::Config(format!(
                "{ON_FAILURE_VAR} must be `abort` or `return`, got `{other}`"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// How many outstanding pointers the registry can hold. 0 turns tracking
    /// off.
    pub capacity: usize,
    pub on_failure: FailurePolicy,
}

impl TrackerConfig {
    pub const fn new() -> Self {
        Self {
            capacity: 0,
            on_failure: FailurePolicy::Return,
        }
    }

    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub const fn with_failure_policy(mut self, on_failure: FailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Defaults, overridden by `SAFEALLOC_CAPACITY` and
    /// `SAFEALLOC_ON_FAILURE` where those are set.
    pub fn from_env() -> Result<Self> {
        Self::new().with_env_overrides()
    }

    /// `self`, overridden by `SAFEALLOC_CAPACITY` and `SAFEALLOC_ON_FAILURE`
    /// where those are set.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = self;
        if let Some(capacity) = lookup(CAPACITY_VAR) {
            config.capacity = capacity.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{CAPACITY_VAR} must be a non-negative integer, got `{capacity}`"
                ))
            })?;
        }
        if let Some(on_failure) = lookup(ON_FAILURE_VAR) {
            config.on_failure = FailurePolicy::parse(&on_failure)?;
        }
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }
}
