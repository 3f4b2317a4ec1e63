use csv::StringRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed enumeration of operation categories.
///
/// Every record in the input stream carries one of these labels. Routing from
/// category to histogram pair is resolved through this enum at construction
/// time rather than by string comparison in the hot loop, so an unrecognized
/// label is a decode error and can never reach a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum CommandCategory {
    SetupWrite = 0,
    Write = 1,
    Update = 2,
    Read = 3,
    CursorRead = 4,
    Delete = 5,
}

impl CommandCategory {
    /// All categories, in histogram-slot order.
    pub const ALL: [CommandCategory; 6] = [
        CommandCategory::SetupWrite,
        CommandCategory::Write,
        CommandCategory::Update,
        CommandCategory::Read,
        CommandCategory::CursorRead,
        CommandCategory::Delete,
    ];

    /// Parse a wire label into a category.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "SETUP_WRITE" => Some(CommandCategory::SetupWrite),
            "WRITE" => Some(CommandCategory::Write),
            "UPDATE" => Some(CommandCategory::Update),
            "READ" => Some(CommandCategory::Read),
            "CURSOR_READ" => Some(CommandCategory::CursorRead),
            "DELETE" => Some(CommandCategory::Delete),
            _ => None,
        }
    }

    /// The wire label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            CommandCategory::SetupWrite => "SETUP_WRITE",
            CommandCategory::Write => "WRITE",
            CommandCategory::Update => "UPDATE",
            CommandCategory::Read => "READ",
            CommandCategory::CursorRead => "CURSOR_READ",
            CommandCategory::Delete => "DELETE",
        }
    }

    /// Key used for this category in the serialized result document.
    pub fn json_key(&self) -> &'static str {
        match self {
            CommandCategory::SetupWrite => "setupWrite",
            CommandCategory::Write => "write",
            CommandCategory::Update => "update",
            CommandCategory::Read => "read",
            CommandCategory::CursorRead => "readCursor",
            CommandCategory::Delete => "delete",
        }
    }

    /// Histogram slot index for this category.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single atomic unit of work read from the input stream.
///
/// Immutable once decoded; owned by the scanner until handed to a batch, then
/// moved into the worker that processes the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Operation category used for stat demultiplexing
    pub category: CommandCategory,
    /// Identifier of the command or query template that produced this record
    pub id: String,
    /// The executable command name
    pub command: String,
    /// Ordered command arguments
    pub args: Vec<String>,
    /// Transmitted payload size attributed to this record, in bytes
    pub tx_bytes: u64,
}

/// Recoverable record-decoding errors.
///
/// These never unwind past the scanner: a malformed record is skipped with a
/// warning and the scan loop continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("record has {0} fields, need at least 3 (category, id, command)")]
    TooFewFields(usize),
    #[error("unknown command category {0:?}")]
    UnknownCategory(String),
}

/// Decode one CSV record from the input stream.
///
/// The wire format is `category,id,command[,arg...]`. The transmitted byte
/// count attributed to the record is the serialized record length minus the
/// category label, matching how prior result sets accounted for payload size.
pub fn decode_record(fields: &StringRecord) -> Result<Record, DecodeError> {
    if fields.len() < 3 {
        return Err(DecodeError::TooFewFields(fields.len()));
    }

    let label = &fields[0];
    let category = CommandCategory::from_label(label)
        .ok_or_else(|| DecodeError::UnknownCategory(label.to_string()))?;

    // Reconstructed row length: field bytes plus one separator per boundary.
    let row_len: usize = fields.iter().map(str::len).sum::<usize>() + (fields.len() - 1);
    let tx_bytes = (row_len - label.len()) as u64;

    Ok(Record {
        category,
        id: fields[1].to_string(),
        command: fields[2].to_string(),
        args: fields.iter().skip(3).map(str::to_string).collect(),
        tx_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn test_category_label_round_trip() {
        for category in CommandCategory::ALL {
            assert_eq!(CommandCategory::from_label(category.label()), Some(category));
        }
        assert_eq!(CommandCategory::from_label("APPEND"), None);
        assert_eq!(CommandCategory::from_label("write"), None);
    }

    #[test]
    fn test_category_indices_are_distinct() {
        let mut seen = [false; 6];
        for category in CommandCategory::ALL {
            assert!(!seen[category.index()]);
            seen[category.index()] = true;
        }
    }

    #[test]
    fn test_decode_write_record() {
        let record = decode_record(&rec(&[
            "WRITE",
            "doc-add",
            "FT.ADD",
            "idx1",
            "doc:1",
            "1.0",
            "FIELDS",
            "title",
            "hello",
        ]))
        .unwrap();

        assert_eq!(record.category, CommandCategory::Write);
        assert_eq!(record.id, "doc-add");
        assert_eq!(record.command, "FT.ADD");
        assert_eq!(record.args.len(), 6);
        assert_eq!(record.args[0], "idx1");
    }

    #[test]
    fn test_decode_query_without_extra_args() {
        let record = decode_record(&rec(&["READ", "q1", "PING"])).unwrap();
        assert_eq!(record.category, CommandCategory::Read);
        assert!(record.args.is_empty());
    }

    #[test]
    fn test_decode_tx_bytes_excludes_label() {
        // "WRITE,q,CMD" is 11 bytes on the wire; the label is 5.
        let record = decode_record(&rec(&["WRITE", "q", "CMD"])).unwrap();
        assert_eq!(record.tx_bytes, 6);
    }

    #[test]
    fn test_decode_rejects_short_record() {
        assert!(matches!(
            decode_record(&rec(&["WRITE", "q1"])),
            Err(DecodeError::TooFewFields(2))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_category() {
        assert!(matches!(
            decode_record(&rec(&["UPSERT", "q1", "FT.ADD"])),
            Err(DecodeError::UnknownCategory(_))
        ));
    }
}
