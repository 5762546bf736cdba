//! CLI command implementations
//!
//! `write` appends exactly one frame and prints its receipt. `read` streams
//! frames from segment files to stdout.

use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};

use serde_json::{json, Value};
use uuid::Uuid;

use crate::append_log::{
    AppendOptions, AppendReceipt, Durability, FrameEmitter, FrameFields, FrameFilter, LogStream,
    LogWriter, OutputFormat, ReadMode, ReadSummary, SegmentNotifier, SeqStrategy, SpoolNotifier,
};
use crate::config::LogConfig;
use crate::observability::{log_event, Event};

use super::args::{Command, ReadArgs, WriteArgs};
use super::errors::CliResult;
use super::io::{write_response, write_stats};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Write(args) => write(&args),
        Command::Read(args) => read(&args),
    }
}

/// Append one frame and print the receipt
pub fn write(args: &WriteArgs) -> CliResult<()> {
    let receipt = append_frame(args)?;
    write_response(receipt_json(&receipt))
}

/// Append one frame as described by `args`
pub fn append_frame(args: &WriteArgs) -> CliResult<AppendReceipt> {
    let config = resolve_config(args)?;
    let options = config.to_append_options();

    let session_id = args
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let fields = FrameFields::new(args.user_id.as_str(), args.content.as_str())
        .with_role(args.role.as_str())
        .with_metadata(parse_metadata(args.metadata_json.as_deref()));

    let receipt = match &config.queue_spool {
        Some(spool) => append_with(
            LogWriter::new(&config.log_dir, SpoolNotifier::new(spool)),
            &session_id,
            fields,
            &options,
        )?,
        None => append_with(LogWriter::open(&config.log_dir), &session_id, fields, &options)?,
    };
    Ok(receipt)
}

fn append_with<N: SegmentNotifier>(
    writer: LogWriter<N>,
    session_id: &str,
    fields: FrameFields,
    options: &AppendOptions,
) -> CliResult<AppendReceipt> {
    Ok(writer.append(session_id, fields, options)?)
}

/// Configuration file values with command-line flags applied on top.
///
/// Seq precedence: `--seq`, then `--alloc-seq`, then `--auto-seq`, then the
/// file. `--fsync` wins over `--fsync-interval`.
pub fn resolve_config(args: &WriteArgs) -> CliResult<LogConfig> {
    let mut config = match &args.config {
        Some(path) => LogConfig::load(path)?,
        None => LogConfig::default(),
    };

    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(max_size) = args.max_size {
        config.max_size_bytes = max_size;
    }
    if let Some(max_age) = args.max_age {
        config.max_age_secs = max_age;
    }
    if let Some(spool) = &args.queue_spool {
        config.queue_spool = Some(spool.clone());
    }
    if args.strict_queue {
        config.strict_queue = true;
    }
    if args.enable_lock {
        config.enable_lock = true;
    }

    if let Some(seq) = args.seq {
        config.sequencing = SeqStrategy::Explicit(seq);
    } else if args.alloc_seq {
        config.sequencing = SeqStrategy::Allocated;
    } else if args.auto_seq {
        config.sequencing = SeqStrategy::Scanned;
    }

    if args.fsync {
        config.durability = Durability::Always;
    } else if let Some(n) = args.fsync_interval {
        config.durability = Durability::EveryN(n);
    }

    config.validate()?;
    Ok(config)
}

/// Metadata from `--metadata-json`; anything but a JSON object is dropped.
pub fn parse_metadata(raw: Option<&str>) -> BTreeMap<String, Value> {
    let Some(raw) = raw else {
        return BTreeMap::new();
    };
    let reason = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => return map.into_iter().collect(),
        Ok(_) => "not a JSON object".to_string(),
        Err(e) => e.to_string(),
    };
    log_event(Event::MetadataIgnored, &[("reason", reason.as_str())]);
    BTreeMap::new()
}

fn receipt_json(receipt: &AppendReceipt) -> Value {
    json!({
        "session_id": receipt.session_id,
        "seq": receipt.seq,
        "segment": receipt.segment.display().to_string(),
        "segment_size": receipt.segment_size,
        "rotation": receipt.rotation.as_str(),
        "sealed": receipt.rotation.sealed().map(|p| p.display().to_string()),
        "synced": receipt.synced,
    })
}

/// Stream frames to stdout, then optionally a summary to stderr
pub fn read(args: &ReadArgs) -> CliResult<()> {
    let stdout = io::stdout();
    let summary = read_frames(args, stdout.lock())?;
    if args.stats {
        write_stats(&stats_json(&summary, args.detect_gaps))?;
    }
    Ok(())
}

/// Decode, filter and re-emit the frames of `args.paths` into `out`
pub fn read_frames<W: Write>(args: &ReadArgs, out: W) -> CliResult<ReadSummary> {
    let mode = if args.strict {
        ReadMode::Strict
    } else if args.lenient {
        ReadMode::Lenient
    } else {
        ReadMode::Stop
    };
    let format = if args.binary {
        OutputFormat::Binary
    } else if args.pretty {
        OutputFormat::Pretty
    } else {
        OutputFormat::Jsonl
    };
    let filter = FrameFilter {
        since: args.since,
        until: args.until,
        session: args.session.clone(),
        user: args.user.clone(),
        role: args.role.clone(),
    };

    let mut stream = LogStream::open(&args.paths, filter, mode, args.detect_gaps);
    let mut emitter = FrameEmitter::new(BufWriter::new(out), format);
    for item in stream.by_ref() {
        emitter.emit(&item?)?;
    }
    emitter.finish()?;

    Ok(stream.into_summary())
}

fn stats_json(summary: &ReadSummary, detect_gaps: bool) -> Value {
    let mut stats = json!({
        "frames": summary.frames,
        "sessions": summary.distinct_sessions(),
        "per_session": summary.sessions,
        "diagnostics": summary.diagnostics,
    });
    if detect_gaps {
        stats["gaps"] = json!(summary.gaps);
    }
    stats
}
