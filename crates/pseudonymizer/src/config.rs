//! Configuration loading and validation for the pseudonymization service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::crypto::Alphabet;

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// KMS key ID or ARN that wraps the DEK. **Required.**
    pub fpe_master_key_arn: String,

    /// Secrets Manager name under which the wrapped DEK is persisted. **Required.**
    pub fpe_dek_secret_name: String,

    /// Hex-encoded FF1 tweak shared by every request. **Required.**
    pub fpe_tweak: String,

    /// Custom numeral alphabet; defaults to `0-9a-zA-Z`.
    #[serde(default)]
    pub fpe_alphabet: Option<String>,

    /// Region used by the corrected session when the environment has none.
    #[serde(default = "default_fallback_region")]
    pub aws_fallback_region: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// OTLP endpoint for span export. Logs only when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_fallback_region() -> String {
    "us-east-1".into()
}
fn default_listen_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Decoded tweak bytes. Its length is the FF1 tweak length.
    ///
    /// # Errors
    ///
    /// Returns an error if `FPE_TWEAK` is not valid hex.
    pub fn tweak(&self) -> Result<Vec<u8>> {
        hex::decode(self.fpe_tweak.trim()).context("FPE_TWEAK must be hex-encoded")
    }

    /// The configured alphabet, or the default one.
    ///
    /// # Errors
    ///
    /// Returns an error if `FPE_ALPHABET` has repeated symbols or fewer than two.
    pub fn alphabet(&self) -> Result<Alphabet> {
        match &self.fpe_alphabet {
            Some(symbols) => Alphabet::new(symbols).context("FPE_ALPHABET is invalid"),
            None => Ok(Alphabet::default()),
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.fpe_master_key_arn, "FPE_MASTER_KEY_ARN")?;
        ensure_non_empty(&self.fpe_dek_secret_name, "FPE_DEK_SECRET_NAME")?;
        ensure_non_empty(&self.aws_fallback_region, "AWS_FALLBACK_REGION")?;
        self.tweak()?;
        self.alphabet()?;

        if self.listen_port == 0 {
            anyhow::bail!("LISTEN_PORT must be > 0");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            fpe_master_key_arn: "alias/fpe-master-key".into(),
            fpe_dek_secret_name: "fpe-dek".into(),
            fpe_tweak: "D8E7920AFA330A73".into(),
            fpe_alphabet: None,
            aws_fallback_region: default_fallback_region(),
            listen_port: default_listen_port(),
            otel_exporter_otlp_endpoint: None,
            log_level: default_log_level(),
        }
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_fallback_region(), "us-east-1");
        assert_eq!(default_listen_port(), 8080);
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn valid_config_passes() {
        let cfg = valid();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tweak().unwrap().len(), 8);
        assert_eq!(cfg.alphabet().unwrap().len(), 62);
    }

    #[test]
    fn validate_rejects_empty_master_key() {
        let cfg = Config {
            fpe_master_key_arn: " ".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_secret_name() {
        let cfg = Config {
            fpe_dek_secret_name: "".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_hex_tweak() {
        let cfg = Config {
            fpe_tweak: "not-hex".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn empty_tweak_is_allowed() {
        let cfg = Config {
            fpe_tweak: "".into(),
            ..valid()
        };
        assert!(cfg.validate().is_ok());
        assert!(cfg.tweak().unwrap().is_empty());
    }

    #[test]
    fn validate_rejects_duplicate_alphabet() {
        let cfg = Config {
            fpe_alphabet: Some("0123456780".into()),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }
}
