use std::path::Path;

use anyhow::Context as _;
use secrecy::ExposeSecret;

use crate::Config;

impl Config {
    /// Read, expand and validate a TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a placeholder cannot be
    /// expanded, the TOML is malformed, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`], minus the file access
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded = crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;
        let config: Self = toml::from_str(&expanded).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistent setting
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_accounts()?;
        self.validate_upstream()?;
        self.validate_transport()?;
        Ok(())
    }

    fn validate_accounts(&self) -> anyhow::Result<()> {
        if self.accounts.is_empty() {
            anyhow::bail!("at least one [[accounts]] entry must be configured");
        }

        for (index, account) in self.accounts.iter().enumerate() {
            if account.access_token.expose_secret().trim().is_empty() {
                anyhow::bail!("accounts[{index}].access_token must not be empty");
            }
            if account.project_id.trim().is_empty() {
                anyhow::bail!("accounts[{index}].project_id must not be empty");
            }
        }

        Ok(())
    }

    fn validate_upstream(&self) -> anyhow::Result<()> {
        if self.upstream.timeout_seconds == 0 {
            anyhow::bail!("upstream.timeout_seconds must be greater than 0");
        }
        if self.upstream.host.trim().is_empty() {
            anyhow::bail!("upstream.host must not be empty");
        }
        Ok(())
    }

    fn validate_transport(&self) -> anyhow::Result<()> {
        if self.transport.binary.as_os_str().is_empty() {
            anyhow::bail!("transport.binary must not be empty");
        }

        if let Some(ref proxy) = self.transport.proxy
            && proxy.enabled
            && proxy.url.trim().is_empty()
        {
            anyhow::bail!("transport.proxy.url is required when the proxy is enabled");
        }

        Ok(())
    }
}
