//! JSON output for the CLI
//!
//! Responses go to stdout as a single JSON line. Read statistics go to
//! stderr so they never mix with frame output.

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;

/// Write a success response to stdout
pub fn write_response(data: Value) -> CliResult<()> {
    let stdout = io::stdout();
    write_response_to(stdout.lock(), data)
}

pub fn write_response_to<W: Write>(mut out: W, data: Value) -> CliResult<()> {
    let response = serde_json::json!({
        "status": "ok",
        "data": data
    });

    serde_json::to_writer(&mut out, &response)?;
    writeln!(out)?;
    out.flush()?;

    Ok(())
}

/// Write a summary line to stderr
pub fn write_stats(stats: &Value) -> CliResult<()> {
    let mut stderr = io::stderr().lock();
    serde_json::to_writer(&mut stderr, stats)?;
    writeln!(stderr)?;
    stderr.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_envelope() {
        let mut out = Vec::new();
        write_response_to(&mut out, json!({"seq": 3})).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["data"]["seq"], 3);
    }
}
