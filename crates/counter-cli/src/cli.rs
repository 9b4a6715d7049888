//! CLI argument definitions for the `counter` binary.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// counter -- page-view counters on a Redis-compatible store.
#[derive(Debug, Parser)]
#[command(
    name = "counter",
    version,
    about = "Page-view counters on a Redis-compatible store",
    long_about = "Operate namespaced page-view counters with sliding expiry. \
                  Every command prints one JSON object {code, err_msg, data} on stdout."
)]
pub struct Cli {
    /// Path to the TOML configuration file. A missing file is not an error.
    #[arg(long, global = true, default_value = "counter.toml")]
    pub config: PathBuf,

    /// Store URL, overriding the configuration file and COUNTER_REDIS_URL.
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Default log level when RUST_LOG is unset. Logs go to stderr.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check that the store is reachable.
    Ping,

    /// Register a namespace.
    Create {
        namespace: String,

        /// Namespace secret; defaults to the namespace name.
        #[arg(long)]
        secret: Option<String>,
    },

    /// Read one counter, or every counter of the namespace.
    Get {
        namespace: String,
        key: Option<String>,
    },

    /// Add one to a counter.
    Increment {
        namespace: String,
        key: String,

        #[arg(long)]
        secret: String,
    },

    /// Overwrite a counter with an integer value.
    Reset {
        namespace: String,
        key: String,

        #[arg(allow_hyphen_values = true)]
        value: String,

        #[arg(long)]
        secret: String,
    },

    /// Remove a counter.
    Delete {
        namespace: String,
        key: String,

        #[arg(long)]
        secret: String,
    },

    /// Store-wide statistics.
    Stats {
        #[command(subcommand)]
        target: StatsTarget,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum StatsTarget {
    /// Number of registered namespaces.
    Namespaces,
    /// Number of live counters.
    Keys,
    /// Total metered requests.
    Requests,
}

impl StatsTarget {
    pub fn label(self) -> &'static str {
        match self {
            Self::Namespaces => "namespaces",
            Self::Keys => "keys",
            Self::Requests => "requests",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_increment_with_global_flags() {
        let cli = Cli::try_parse_from([
            "counter",
            "increment",
            "blog",
            "home",
            "--secret",
            "s",
            "--url",
            "memory://",
        ])
        .unwrap();
        assert_eq!(cli.url.as_deref(), Some("memory://"));
        assert_eq!(cli.log_level, "warn");
        assert!(matches!(
            cli.command,
            Commands::Increment { ref namespace, ref key, ref secret }
                if namespace == "blog" && key == "home" && secret == "s"
        ));
    }

    #[test]
    fn get_key_is_optional() {
        let cli = Cli::try_parse_from(["counter", "get", "blog"]).unwrap();
        assert!(matches!(cli.command, Commands::Get { key: None, .. }));
    }

    #[test]
    fn mutations_require_secret() {
        assert!(Cli::try_parse_from(["counter", "delete", "blog", "home"]).is_err());
    }

    #[test]
    fn stats_targets() {
        let cli = Cli::try_parse_from(["counter", "stats", "requests"]).unwrap();
        match cli.command {
            Commands::Stats { target } => assert_eq!(target.label(), "requests"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
