//! Action log ingestion
//!
//! An action log is a JSON Lines file with one action per line, tagged by
//! `kind`:
//!
//! ```text
//! {"kind":"edit","timestamp":"2024-03-01T10:00:00Z","path":"src/Foo.java","size":120,"methods":3}
//! {"kind":"unit_test_session","timestamp":"2024-03-01T10:01:00Z","successful":true}
//! ```
//!
//! ## Error Handling
//!
//! - **Malformed lines**: recorded in [`ActionLog::warnings`], line skipped,
//!   reading continues.
//! - **Blank lines and `#` comments**: skipped silently.
//! - **I/O errors** (missing file, unreadable line): fatal.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::Action;

/// Actions read from a log, in file order.
#[derive(Debug, Default)]
pub struct ActionLog {
    pub actions: Vec<Action>,
    /// Non-fatal problems, one per skipped line
    pub warnings: Vec<String>,
}

/// Parse a single log record. `line` is 1-based and only used for errors.
pub fn parse_record(line: usize, text: &str) -> Result<Action> {
    serde_json::from_str(text).map_err(|e| Error::Parse {
        line,
        message: e.to_string(),
    })
}

/// Read every action from a JSON Lines log.
pub fn read_action_log(path: &Path) -> Result<ActionLog> {
    let file = File::open(path).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to open {}: {}", path.display(), e),
        ))
    })?;
    read_actions(BufReader::new(file))
}

/// Read actions from any buffered reader.
pub fn read_actions(reader: impl BufRead) -> Result<ActionLog> {
    let mut log = ActionLog::default();

    for (i, line) in reader.lines().enumerate() {
        let line_number = i + 1;
        let line = line?;
        let text = line.trim();
        if text.is_empty() || text.starts_with('#') {
            continue;
        }

        match parse_record(line_number, text) {
            Ok(action) => log.actions.push(action),
            Err(e) => {
                tracing::warn!(line = line_number, error = %e, "Skipping malformed action record");
                log.warnings.push(e.to_string());
            }
        }
    }

    tracing::debug!(
        actions = log.actions.len(),
        warnings = log.warnings.len(),
        "Read action log"
    );
    Ok(log)
}

/// Write actions as JSON Lines.
pub fn write_actions(mut writer: impl Write, actions: &[Action]) -> Result<()> {
    for action in actions {
        serde_json::to_writer(&mut writer, action)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}
