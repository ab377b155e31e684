// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Implementation/runtime parameters: retry policy, timeouts, limits.
    pub runtime: RuntimeConfig,
    /// Transport-security parameters consumed by the TLS layer.
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings governing the invocation engine and the transport.
pub struct RuntimeConfig {
    #[serde(rename = "MaxRetries")]
    /// Attempt ceiling for transparent retry of idempotent invocations.
    pub max_retries: u32,

    #[serde(rename = "RetryBackoffMs", with = "serde_millis")]
    /// Base interval for exponential back-off between retry attempts.
    pub retry_backoff: Duration,

    #[serde(rename = "ConnectTimeoutMs")]
    /// Timeout for establishing the TCP connection; negative means infinite.
    pub connect_timeout_ms: i64,

    #[serde(rename = "ReadTimeoutMs")]
    /// Readiness-gate timeout on the read side; negative means infinite.
    pub read_timeout_ms: i64,

    #[serde(rename = "WriteTimeoutMs")]
    /// Readiness-gate timeout on the write side; negative means infinite.
    pub write_timeout_ms: i64,

    #[serde(rename = "MaxMessageSize")]
    /// Upper bound on a single wire frame, header included.
    pub max_message_size: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
/// Security settings: user-supplied Diffie-Hellman parameter overrides.
pub struct SecurityConfig {
    #[serde(default, rename = "DhParams")]
    /// PEM files registered with the DH cache at configuration time.
    pub dh_params: Vec<DhOverride>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// One `key-length -> PEM file` override entry.
pub struct DhOverride {
    #[serde(rename = "KeyLength")]
    /// Key length in bits this parameter set serves.
    pub key_length: u32,
    #[serde(rename = "Path")]
    /// Path to the PEM file holding the DH parameters.
    pub path: String,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.runtime.max_message_size >= 1024,
            "MaxMessageSize must be >= 1024"
        );
        ensure!(
            !self.runtime.retry_backoff.is_zero(),
            "RetryBackoffMs must be > 0"
        );

        // The DH cache keeps its override list ordered; a shuffled config is
        // almost always a typo, so reject it instead of silently re-sorting.
        let mut prev = 0u32;
        for ov in &self.security.dh_params {
            ensure!(ov.key_length > 0, "DhParams KeyLength must be > 0");
            ensure!(
                ov.key_length >= prev,
                "DhParams entries must be sorted by KeyLength"
            );
            prev = ov.key_length;
        }

        Ok(())
    }

    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        millis_opt(self.runtime.connect_timeout_ms)
    }

    #[inline]
    pub fn read_timeout(&self) -> Option<Duration> {
        millis_opt(self.runtime.read_timeout_ms)
    }

    #[inline]
    pub fn write_timeout(&self) -> Option<Duration> {
        millis_opt(self.runtime.write_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig {
                max_retries: 3,
                retry_backoff: Duration::from_millis(100),
                connect_timeout_ms: 10_000,
                read_timeout_ms: 30_000,
                write_timeout_ms: 30_000,
                max_message_size: 16 * 1024 * 1024,
            },
            security: SecurityConfig::default(),
        }
    }
}

/// Negative timeouts mean "wait forever" at the readiness gate.
#[inline]
fn millis_opt(ms: i64) -> Option<Duration> {
    if ms < 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

/// Serde helpers for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
