//! Command-line surface of the entrypoint binary.
//!
//! The flag set matches the container image's historical invocation:
//! `--standalone`, `--bootstrap`, or `-s/--start` pick the role, and
//! `--debug` widens the log filter.

use clap::{ArgGroup, Parser};

use corral_config::{LogFormat, Overrides, Role};

/// Container entrypoint that bootstraps and supervises an etcd cluster member.
#[derive(Parser, Debug)]
#[command(name = "corral", group(ArgGroup::new("role").required(true)))]
pub struct Cli {
    /// Run a stand-alone keep-alive process with no clustering.
    #[arg(long, group = "role")]
    pub standalone: bool,
    /// Run the first cluster member and expose the discovery endpoint.
    #[arg(long, group = "role")]
    pub bootstrap: bool,
    /// Join an existing cluster via the bootstrap node's discovery endpoint.
    #[arg(short = 's', long, group = "role")]
    pub start: bool,
    /// Enable verbose startup diagnostics.
    #[arg(long)]
    pub debug: bool,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
    /// Hostname advertised to the cluster instead of the system hostname.
    #[arg(long)]
    pub hostname: Option<String>,
    /// Path to the etcd binary.
    #[arg(long)]
    pub etcd_binary: Option<String>,
}

impl Cli {
    /// Role selected by the mutually exclusive flags.
    #[must_use]
    pub fn role(&self) -> Role {
        if self.standalone {
            Role::Standalone
        } else if self.bootstrap {
            Role::Bootstrap
        } else {
            Role::Join
        }
    }

    /// Command-line values that take precedence over the environment.
    #[must_use]
    pub fn overrides(&self) -> Overrides {
        Overrides {
            hostname: self.hostname.clone(),
            etcd_binary: self.etcd_binary.clone(),
        }
    }
}
