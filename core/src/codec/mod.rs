//! Session log text codec
//!
//! A serialized log is JSON Lines: the header object on the first line, then
//! one object per packet entry in `sequencePosition` order. Binary payload
//! leaves are written in the tagged form described in [`payload`] so that
//! `parse(serialize(log)) == log` holds for every log, nested buffers
//! included.

pub mod payload;

use crate::error::CodecError;
use crate::types::{Direction, SessionHeader, SessionLog, FORMAT_VERSION};

/// Serialize a session log to its text form.
pub fn serialize(log: &SessionLog) -> String {
    // Header and entries are plain structs; serialization cannot fail.
    let mut out = String::new();
    push_line(&mut out, &log.header);
    for entry in &log.entries {
        push_line(&mut out, entry);
    }
    out
}

fn push_line<T: serde::Serialize>(out: &mut String, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            out.push_str(&line);
            out.push('\n');
        }
        Err(err) => {
            // Unreachable for our types; keep the log intact rather than panic.
            tracing::error!(%err, "failed to serialize log line");
        }
    }
}

/// Parse a serialized session log.
///
/// Restores every tagged binary leaf back into raw bytes, rejects logs whose
/// `formatVersion` differs from the one this build supports, and verifies
/// that sequence positions are strictly increasing per direction.
pub fn parse(text: &str) -> Result<SessionLog, CodecError> {
    let mut lines = numbered_lines(text);

    let (line_no, header_line) = lines.next().ok_or(CodecError::Empty)?;
    let header: SessionHeader =
        serde_json::from_str(header_line).map_err(|err| CodecError::Malformed {
            line: line_no,
            message: err.to_string(),
        })?;

    if header.format_version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedFormat {
            found: header.format_version,
        });
    }

    let mut entries = Vec::new();
    let mut last_seq: [Option<u64>; 2] = [None, None];
    for (line_no, line) in lines {
        let entry: crate::types::PacketEntry =
            serde_json::from_str(line).map_err(|err| CodecError::Malformed {
                line: line_no,
                message: err.to_string(),
            })?;

        let slot = match entry.direction {
            Direction::FromServer => 0,
            Direction::FromClient => 1,
        };
        if let Some(prev) = last_seq[slot] {
            if entry.sequence <= prev {
                return Err(CodecError::Malformed {
                    line: line_no,
                    message: format!(
                        "sequence position {} not increasing (previous {})",
                        entry.sequence, prev
                    ),
                });
            }
        }
        last_seq[slot] = Some(entry.sequence);
        entries.push(entry);
    }

    Ok(SessionLog { header, entries })
}

fn numbered_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
}
