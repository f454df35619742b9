//! Tracing initialization and terminal color policy.
//!
//! Centralizes tracing config so the binary and tests behave the same.
//! Color follows common Rust tool behavior: the command-line choice wins,
//! `NO_COLOR` and `EMACS` disable colors in `Auto`, and `Auto` only colors
//! a real TTY.

use anyhow::Result;
use std::env;
use std::str::FromStr;
use tracing_subscriber::{fmt, EnvFilter};

/// When to emit ANSI colors on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorWhen {
    /// Enable colors only when stderr is a TTY.
    #[default]
    Auto,

    /// Always enable colors.
    Always,

    /// Never enable colors.
    Never,
}

impl ColorWhen {
    // ---
    /// Resolves the policy against the environment and stderr.
    pub fn enabled(self) -> bool {
        // ---
        match self {
            ColorWhen::Always => true,
            ColorWhen::Never => false,
            ColorWhen::Auto => {
                if env::var_os("NO_COLOR").is_some() || env::var_os("EMACS").is_some() {
                    return false;
                }
                atty::is(atty::Stream::Stderr)
            }
        }
    }
}

impl FromStr for ColorWhen {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s {
            "auto" => Ok(ColorWhen::Auto),
            "always" => Ok(ColorWhen::Always),
            "never" => Ok(ColorWhen::Never),
            other => anyhow::bail!("invalid color policy: {other} (expected auto|always|never)"),
        }
    }
}

/// Initialize the tracing subscriber.
///
/// - Respects `RUST_LOG` via `EnvFilter`, defaulting to `info`.
/// - ANSI color controlled by `ColorWhen`.
pub fn init_tracing(color: ColorWhen) -> Result<()> {
    // ---
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(env_filter)
        .with_ansi(color.enabled())
        .init();

    Ok(())
}
