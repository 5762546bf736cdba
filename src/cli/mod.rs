//! CLI module for sessionlog
//!
//! Provides command-line interface for:
//! - write: Append one frame to a session log
//! - read: Decode, filter and print segment files

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, ReadArgs, WriteArgs};
pub use commands::{append_frame, parse_metadata, read, read_frames, resolve_config, run, run_command, write};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_response, write_response_to, write_stats};
