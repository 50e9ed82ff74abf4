//! Environment variable access.

use std::env;

/// Source of environment variables; mocked in tests.
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Result<String, env::VarError>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl EnvSource for SystemEnv {
    #[tracing::instrument(skip(self))]
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}
