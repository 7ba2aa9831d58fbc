//! Two-pass assembler for the SIC/XE instruction set.
//!
//! The entry point is [`assemble`], which drives the pipeline described
//! in spec.md §2: macro expansion, Pass 1 (address assignment), Pass 2
//! (instruction encoding), then the record assembler and listing
//! formatter. The opcode table is an external collaborator — load one
//! with [`opcode::OpcodeTable::load`] and pass it in.

pub mod blocktab;
pub mod error;
pub mod intermediate;
pub mod line;
pub mod listing;
pub mod littab;
pub mod macros;
pub mod numlit;
pub mod opcode;
pub mod pass1;
pub mod pass2;
pub mod records;
pub mod symtab;

pub use error::{AssembleError, Result};
use opcode::OpcodeTable;

/// The two artifacts an assembly produces: the object program text and
/// the listing text. Written verbatim to `objectprogram.txt`/`listing.txt`
/// (or whatever paths the caller chooses) on success.
pub struct Assembled {
    pub object_program: String,
    pub listing: String,
}

/// Runs the full pipeline over `source` (one assembly statement per
/// line) using `optab` for mnemonic lookup.
///
/// On any fatal error (spec.md §7), no partial result is returned: the
/// caller gets the first error and nothing else.
pub fn assemble(source: &str, optab: &OpcodeTable) -> Result<Assembled> {
    let raw_lines: Vec<String> = source.lines().map(|s| s.to_string()).collect();
    let expanded = macros::expand(&raw_lines);

    let pass1_out = pass1::run(&expanded, optab)?;
    let pass2_out = pass2::run(&pass1_out, optab)?;

    let object_program = records::assemble(&pass1_out, &pass2_out);
    let listing = listing::format(&pass1_out, &pass2_out);

    Ok(Assembled {
        object_program,
        listing,
    })
}
