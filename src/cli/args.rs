//! CLI argument definitions using clap
//!
//! Commands:
//! - sessionlog write --user-id <U> --content <C> [options]
//! - sessionlog read <PATHS>... [options]

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use crate::append_log::{parse_timestamp, DEFAULT_ROLE};

/// sessionlog - append-only, multi-writer chat session logs
#[derive(Parser, Debug)]
#[command(name = "sessionlog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Append one frame to a session log
    Write(WriteArgs),

    /// Decode segment files and print their frames
    Read(ReadArgs),
}

#[derive(Args, Debug, Clone)]
pub struct WriteArgs {
    /// Session identifier (random UUID when omitted)
    #[arg(long)]
    pub session_id: Option<String>,

    #[arg(long)]
    pub user_id: String,

    #[arg(long, default_value = DEFAULT_ROLE)]
    pub role: String,

    #[arg(long)]
    pub content: String,

    /// Overrides `log_dir` from the config file
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Rotation size threshold in bytes
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Rotation age threshold in seconds
    #[arg(long)]
    pub max_age: Option<u64>,

    /// Spool file receiving sealed segment paths
    #[arg(long)]
    pub queue_spool: Option<PathBuf>,

    /// Exit with code 2 when a sealed segment cannot be queued
    #[arg(long)]
    pub strict_queue: bool,

    /// JSON object stored as frame metadata
    #[arg(long)]
    pub metadata_json: Option<String>,

    /// Explicit sequence number
    #[arg(long)]
    pub seq: Option<u64>,

    /// Allocate seq from the session counter
    #[arg(long)]
    pub alloc_seq: bool,

    /// Scan the active segment for the next seq
    #[arg(long)]
    pub auto_seq: bool,

    /// fsync after every append
    #[arg(long)]
    pub fsync: bool,

    /// fsync when seq is a multiple of N
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub fsync_interval: Option<u64>,

    /// Use advisory locks for rotation and seq allocation
    #[arg(long)]
    pub enable_lock: bool,

    /// Path to configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Segment files, read in the given order
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// JSON lines output, the default (accepted for compatibility)
    #[arg(long, conflicts_with_all = ["pretty", "binary"])]
    pub jsonl: bool,

    /// Indented JSON instead of JSON lines
    #[arg(long, conflicts_with = "binary")]
    pub pretty: bool,

    /// Re-encoded frames, forming a valid segment
    #[arg(long)]
    pub binary: bool,

    /// Skip corrupt frames instead of stopping the file
    #[arg(long, conflicts_with = "strict")]
    pub lenient: bool,

    /// Fail on the first damaged frame
    #[arg(long)]
    pub strict: bool,

    #[arg(long)]
    pub session: Option<String>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub role: Option<String>,

    /// Inclusive lower time bound (RFC 3339 or ISO-8601, UTC if naive)
    #[arg(long, value_parser = parse_time)]
    pub since: Option<DateTime<Utc>>,

    /// Inclusive upper time bound
    #[arg(long, value_parser = parse_time)]
    pub until: Option<DateTime<Utc>>,

    /// Print a summary line to stderr
    #[arg(long)]
    pub stats: bool,

    /// Report seq gaps in the summary
    #[arg(long)]
    pub detect_gaps: bool,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    parse_timestamp(raw).ok_or_else(|| format!("invalid timestamp '{}'", raw))
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_defaults() {
        let cli = Cli::try_parse_from([
            "sessionlog", "write", "--user-id", "alice", "--content", "hi",
        ])
        .unwrap();
        let Command::Write(args) = cli.command else {
            panic!("expected write");
        };
        assert_eq!(args.role, "user");
        assert!(args.session_id.is_none());
        assert!(!args.fsync);
    }

    #[test]
    fn test_write_requires_user_and_content() {
        assert!(Cli::try_parse_from(["sessionlog", "write", "--content", "hi"]).is_err());
        assert!(Cli::try_parse_from(["sessionlog", "write", "--user-id", "a"]).is_err());
    }

    #[test]
    fn test_fsync_interval_must_be_positive() {
        let parsed = Cli::try_parse_from([
            "sessionlog", "write", "--user-id", "a", "--content", "b", "--fsync-interval", "0",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_read_rejects_bad_time_and_conflicts() {
        assert!(Cli::try_parse_from(["sessionlog", "read", "a.log", "--since", "yesterday"]).is_err());
        assert!(Cli::try_parse_from(["sessionlog", "read", "a.log", "--pretty", "--binary"]).is_err());
        assert!(Cli::try_parse_from(["sessionlog", "read", "a.log", "--lenient", "--strict"]).is_err());
        assert!(Cli::try_parse_from(["sessionlog", "read"]).is_err());
        assert!(Cli::try_parse_from(["sessionlog", "read", "a.log", "--jsonl", "--pretty"]).is_err());
        assert!(Cli::try_parse_from(["sessionlog", "read", "a.log", "--jsonl"]).is_ok());

        let cli = Cli::try_parse_from([
            "sessionlog", "read", "a.log", "b.log", "--since", "2024-05-01", "--detect-gaps",
        ])
        .unwrap();
        let Command::Read(args) = cli.command else {
            panic!("expected read");
        };
        assert_eq!(args.paths.len(), 2);
        assert!(args.since.is_some());
        assert!(args.detect_gaps);
    }
}
