use anyhow::{Context, Result};

/// No flag parsing on the client: the two knobs it needs come from the
/// environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let username = std::env::var("BKEN_USERNAME").context("BKEN_USERNAME is not set")?;
        let addr = std::env::var("BKEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        Ok(Self { username, addr })
    }
}
