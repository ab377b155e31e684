// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Deserialize, Clone)]
struct LoggerConfig {
    logger: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "lowercase")]
enum Output {
    Stdout,
    Stderr,
}

#[derive(Debug, Deserialize, Clone)]
struct LogConfig {
    level: String,
    output: Output,
    #[serde(default)]
    is_show_line: bool,
    #[serde(default)]
    is_show_target: bool,
}

/// Initializes the global tracing subscriber from a YAML logger section.
///
/// The level string follows `EnvFilter` syntax; the process environment
/// (`RUST_LOG`) wins over the file when the file value does not parse.
pub fn init_logger(config_path: &str) -> Result<()> {
    let config_content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file: {config_path}"))?;
    let config: LoggerConfig = serde_yaml::from_str(&config_content)
        .with_context(|| format!("Failed to parse config file: {config_path}"))?;

    let env_filter = EnvFilter::try_new(&config.logger.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("Failed to parse log level from config or env")?;

    let fmt_layer = fmt::layer()
        .with_ansi(false)
        .with_line_number(config.logger.is_show_line)
        .with_target(config.logger.is_show_target)
        .with_writer(match config.logger.output {
            Output::Stdout => fmt::writer::BoxMakeWriter::new(std::io::stdout),
            Output::Stderr => fmt::writer::BoxMakeWriter::new(std::io::stderr),
        });

    Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to set global default subscriber")?;

    Ok(())
}
