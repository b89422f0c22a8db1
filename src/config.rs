//! Client configuration with builder pattern.
//!
//! Provides type-safe configuration for cluster clients: the ordered seed
//! address list used to bootstrap topology discovery, and the jitter factor
//! applied to the primary-election wait.

use snafu::ensure;

use crate::error::{ConfigSnafu, Result};

/// Default jitter factor for the primary-election wait.
///
/// Zero keeps the wait at exactly its configured duration.
const DEFAULT_SELECTION_WAIT_JITTER: f64 = 0.0;

/// Configuration for a TrellisDB cluster client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ordered seed server addresses used to bootstrap cluster discovery.
    pub(crate) seed_addresses: Vec<String>,

    /// Jitter factor (0.0 to 1.0) randomizing the primary-election wait.
    pub(crate) selection_wait_jitter: f64,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Returns the configured seed addresses, in bootstrap order.
    #[must_use]
    pub fn seed_addresses(&self) -> &[String] {
        &self.seed_addresses
    }

    /// Returns the jitter factor applied to the primary-election wait.
    #[must_use]
    pub fn selection_wait_jitter(&self) -> f64 {
        self.selection_wait_jitter
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    seed_addresses: Vec<String>,
    selection_wait_jitter: Option<f64>,
}

impl ClientConfigBuilder {
    /// Sets the seed server addresses.
    ///
    /// At least one address must be provided. The order given here is the
    /// order topology fetches walk the seeds.
    #[must_use]
    pub fn with_seed_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seed_addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a single seed address.
    #[must_use]
    pub fn with_seed_address<S: Into<String>>(mut self, address: S) -> Self {
        self.seed_addresses.push(address.into());
        self
    }

    /// Sets the jitter factor (0.0 to 1.0) for the primary-election wait.
    ///
    /// Default: 0.0 (no jitter). A non-zero factor spreads concurrent
    /// clients' rediscovery attempts to avoid a thundering herd.
    #[must_use]
    pub fn with_selection_wait_jitter(mut self, jitter: f64) -> Self {
        self.selection_wait_jitter = Some(jitter);
        self
    }

    /// Builds the configuration, validating all settings.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No seed addresses were provided
    /// - Any seed address is empty or contains whitespace
    /// - The jitter factor is outside `[0.0, 1.0]`
    pub fn build(self) -> Result<ClientConfig> {
        ensure!(
            !self.seed_addresses.is_empty(),
            ConfigSnafu { message: "at least one seed address is required" }
        );

        for address in &self.seed_addresses {
            validate_address(address)?;
        }

        let jitter = self.selection_wait_jitter.unwrap_or(DEFAULT_SELECTION_WAIT_JITTER);
        ensure!(
            (0.0..=1.0).contains(&jitter),
            ConfigSnafu { message: "selection_wait_jitter must be within [0.0, 1.0]" }
        );

        Ok(ClientConfig { seed_addresses: self.seed_addresses, selection_wait_jitter: jitter })
    }
}

/// Validates that a seed address is plausibly a host:port identity.
fn validate_address(address: &str) -> Result<()> {
    ensure!(!address.is_empty(), ConfigSnafu { message: "seed address cannot be empty" });
    ensure!(
        !address.contains(char::is_whitespace),
        ConfigSnafu { message: format!("seed address '{address}' cannot contain whitespace") }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_with_single_seed() {
        let config = ClientConfig::builder()
            .with_seed_address("10.0.0.1:1729")
            .build()
            .expect("valid config");

        assert_eq!(config.seed_addresses(), ["10.0.0.1:1729"]);
        assert_eq!(config.selection_wait_jitter(), 0.0);
    }

    #[test]
    fn builder_preserves_seed_order() {
        let config = ClientConfig::builder()
            .with_seed_addresses(["10.0.0.1:1729", "10.0.0.2:1729", "10.0.0.3:1729"])
            .build()
            .expect("valid config");

        assert_eq!(
            config.seed_addresses(),
            ["10.0.0.1:1729", "10.0.0.2:1729", "10.0.0.3:1729"]
        );
    }

    #[test]
    fn builder_rejects_empty_seed_list() {
        let result = ClientConfig::builder().build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_blank_address() {
        let result = ClientConfig::builder().with_seed_address("").build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_whitespace_address() {
        let result = ClientConfig::builder().with_seed_address("10.0.0.1 :1729").build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_accepts_jitter_in_range() {
        let config = ClientConfig::builder()
            .with_seed_address("10.0.0.1:1729")
            .with_selection_wait_jitter(0.25)
            .build()
            .expect("valid config");

        assert_eq!(config.selection_wait_jitter(), 0.25);
    }

    #[test]
    fn builder_rejects_jitter_above_one() {
        let result = ClientConfig::builder()
            .with_seed_address("10.0.0.1:1729")
            .with_selection_wait_jitter(1.5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_rejects_negative_jitter() {
        let result = ClientConfig::builder()
            .with_seed_address("10.0.0.1:1729")
            .with_selection_wait_jitter(-0.1)
            .build();
        assert!(result.is_err());
    }
}
