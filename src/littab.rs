//! Literal table, per spec.md §3/§4.3/§4.4.
//!
//! Literals are registered the first time they appear as an operand
//! (Pass 1) and laid out — given a pool address within whichever block
//! is current — at the next `LTORG`, at `END`, or ahead of a large
//! storage reservation (the >100-byte flush heuristic in `pass1.rs`).

use std::collections::HashMap;

use crate::error::AssembleError;
use crate::numlit;

#[derive(Debug, Clone)]
pub struct Literal {
    pub raw: String,
    pub bytes: Vec<u8>,
    pub block: String,
    pub pool_addr: Option<u32>,
    pub emitted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LiteralTable {
    entries: Vec<Literal>,
    index: HashMap<String, usize>,
}

impl LiteralTable {
    pub fn new() -> Self {
        LiteralTable::default()
    }

    /// Registers `raw` (the literal text, without its leading `=`) if it
    /// isn't already present. A no-op for a literal already seen.
    pub fn register(&mut self, raw: &str, block: &str, line: usize) -> Result<(), AssembleError> {
        if self.index.contains_key(raw) {
            return Ok(());
        }
        let bytes = numlit::decode_literal(raw).map_err(|reason| AssembleError::MalformedLine {
            line,
            reason,
        })?;
        let idx = self.entries.len();
        self.entries.push(Literal {
            raw: raw.to_string(),
            bytes,
            block: block.to_string(),
            pool_addr: None,
            emitted: false,
        });
        self.index.insert(raw.to_string(), idx);
        Ok(())
    }

    pub fn get(&self, raw: &str) -> Option<&Literal> {
        self.index.get(raw).map(|&idx| &self.entries[idx])
    }

    /// Literals still awaiting a pool address, in declaration order.
    pub fn pending(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|lit| lit.pool_addr.is_none())
            .map(|lit| lit.raw.clone())
            .collect()
    }

    /// Assigns `addr` (block-local) to `raw`, and records the block the
    /// literal's bytes physically land in — the block current at the
    /// LTORG/END that laid it out, which is what Pass 2 needs to fold the
    /// pool address into flat CSECT space.
    pub fn assign(&mut self, raw: &str, block: &str, addr: u32) {
        if let Some(&idx) = self.index.get(raw) {
            self.entries[idx].pool_addr = Some(addr);
            self.entries[idx].block = block.to_string();
        }
    }

    pub fn mark_emitted(&mut self, raw: &str) {
        if let Some(&idx) = self.index.get(raw) {
            self.entries[idx].emitted = true;
        }
    }

    /// All literals in declaration order, matching spec.md §4.4's
    /// requirement that Pass 2 walk the literal table in that order.
    pub fn iter(&self) -> impl Iterator<Item = &Literal> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Literal> {
        self.entries.iter_mut()
    }
}
