//! Loads the static mnemonic -> opcode mapping from a CSV table.
//!
//! The table is an external collaborator (see spec.md §1/§6): this module
//! only knows how to read it, not what any particular mnemonic means.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::AssembleError;

#[derive(Debug, Deserialize)]
struct OpcodeRow {
    name: String,
    opcode: String,
    format: String,
}

/// One row of the opcode table: a numeric opcode plus the set of
/// instruction formats the mnemonic is legal in ("1", "2", "3/4", or a
/// specific combination such as "3").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeEntry {
    pub numeric_code: u8,
    pub format: String,
}

impl OpcodeEntry {
    /// Format-1 instructions (e.g. FIX, FLOAT, NORM) occupy a single byte.
    pub fn is_format1(&self) -> bool {
        self.format.contains('1') && !self.format.contains('2') && !self.format.contains('3')
    }

    /// Format 2 is selected solely by the opcode's declared format set: it
    /// must allow "2" and must not also allow "3" (a "3/4" entry always
    /// prefers format 3/4 at encoding time).
    pub fn is_format2(&self) -> bool {
        self.format.contains('2') && !self.format.contains('3')
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpcodeTable {
    entries: HashMap<String, OpcodeEntry>,
}

impl OpcodeTable {
    pub fn get(&self, mnemonic: &str) -> Option<&OpcodeEntry> {
        self.entries.get(mnemonic)
    }

    pub fn contains(&self, mnemonic: &str) -> bool {
        self.entries.contains_key(mnemonic)
    }

    /// Parses an in-memory CSV table. Whitespace in the header and in every
    /// cell is stripped; mnemonic names are uppercased. A missing or
    /// non-hex opcode is fatal.
    pub fn parse(csv_text: &str) -> Result<OpcodeTable, AssembleError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(csv_text.as_bytes());

        let mut entries = HashMap::new();
        for (idx, record) in reader.deserialize::<OpcodeRow>().enumerate() {
            let row = record.map_err(|err| AssembleError::OpTableError {
                path: "<memory>".to_string(),
                reason: format!("row {}: {}", idx, err),
            })?;

            let name = row.name.trim().to_uppercase();
            let opcode_str = row.opcode.trim();
            if opcode_str.is_empty() {
                return Err(AssembleError::OpTableError {
                    path: "<memory>".to_string(),
                    reason: format!("missing opcode for instruction '{}' (row {})", name, idx),
                });
            }
            let numeric_code = u8::from_str_radix(opcode_str, 16).map_err(|_| {
                AssembleError::OpTableError {
                    path: "<memory>".to_string(),
                    reason: format!(
                        "invalid hex opcode '{}' for instruction '{}' (row {})",
                        opcode_str, name, idx
                    ),
                }
            })?;

            entries.insert(
                name,
                OpcodeEntry {
                    numeric_code,
                    format: row.format.trim().to_string(),
                },
            );
        }

        Ok(OpcodeTable { entries })
    }

    pub fn load(path: &Path) -> Result<OpcodeTable, AssembleError> {
        let text = std::fs::read_to_string(path).map_err(|err| AssembleError::OpTableError {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        Self::parse(&text)
    }
}
