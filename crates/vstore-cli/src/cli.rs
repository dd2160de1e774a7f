use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vstore",
    about = "vstore: versioned key index with optimistic commits",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show the effective, validated store configuration
    Config(ConfigArgs),
    /// Run concurrent writers against one branch of an in-memory store
    Stress(StressArgs),
    /// Encode or decode keys
    Key(KeyArgs),
}

/// Configuration sources, applied in order over the defaults.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigSource {
    /// TOML file of configuration keys (e.g. `commit-retries = 10`)
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Override a configuration key, `key=value`; may be repeated
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub source: ConfigSource,
}

#[derive(Args)]
pub struct StressArgs {
    /// Concurrent writer threads
    #[arg(long, default_value = "4")]
    pub writers: usize,
    /// Commits per writer
    #[arg(long, default_value = "100")]
    pub commits: usize,
    /// Keys changed by every commit
    #[arg(long, default_value = "1")]
    pub keys_per_commit: usize,
    #[arg(long, default_value = "main")]
    pub branch: String,
    #[command(flatten)]
    pub source: ConfigSource,
}

#[derive(Args)]
pub struct KeyArgs {
    #[command(subcommand)]
    pub action: KeyAction,
}

#[derive(Subcommand)]
pub enum KeyAction {
    /// Join segments into the canonical key string
    Encode {
        #[arg(required = true)]
        segments: Vec<String>,
    },
    /// Split a canonical key string into segments
    Decode { encoded: String },
}
