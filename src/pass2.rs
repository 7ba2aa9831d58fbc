//! Pass 2 driver: instruction encoding, per spec.md §4.4.
//!
//! Addresses are folded from block-local to flat control-section space
//! once, up front (spec.md §9), rather than mutated mid-walk: every
//! symbol and literal-pool address is shifted by its owning block's base
//! before Pass 2 ever looks at it.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use crate::blocktab::BlockTable;
use crate::error::AssembleError;
use crate::intermediate::{IntermediateRecord, Kind};
use crate::line::ParsedLine;
use crate::littab::LiteralTable;
use crate::numlit;
use crate::opcode::{OpcodeEntry, OpcodeTable};
use crate::pass1::Pass1Output;
use crate::symtab::SymbolTable;

/// A contiguous run of object bytes landing at one flat CSECT address.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub csect: String,
    pub address: u32,
    pub bytes: Vec<u8>,
}

/// A reservation (`RESW`/`RESB`) that must break a text record in
/// progress even though it contributes no bytes of its own.
#[derive(Debug, Clone)]
pub struct Gap {
    pub csect: String,
    pub address: u32,
}

/// A format-4 address field whose value depends on where its CSECT (or
/// an externally linked one) ends up loaded.
#[derive(Debug, Clone)]
pub struct Modification {
    pub csect: String,
    pub address: u32,
    pub half_bytes: u8,
    pub sign: char,
    pub symbol: String,
}

#[derive(Debug, Clone)]
pub struct CsectInfo {
    pub name: String,
    pub start_address: u32,
    pub length: u32,
    pub has_entry: bool,
    pub extdef: Vec<(String, u32)>,
    pub extref: Vec<String>,
}

pub struct Pass2Output {
    pub folded_symtab: SymbolTable,
    pub folded_littab: LiteralTable,
    pub chunks: Vec<Chunk>,
    pub gaps: Vec<Gap>,
    pub modifications: Vec<Modification>,
    pub csects: Vec<CsectInfo>,
}

const REGISTER_CODES: &[(&str, u8)] = &[
    ("A", 0),
    ("X", 1),
    ("L", 2),
    ("B", 3),
    ("S", 4),
    ("T", 5),
    ("F", 6),
];

fn register_code(name: &str) -> Option<u8> {
    REGISTER_CODES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, c)| *c)
}

pub fn run(pass1: &Pass1Output, optab: &OpcodeTable) -> Result<Pass2Output, AssembleError> {
    log::debug!("pass 2: folding {} intermediate record(s)", pass1.intermediate.len());
    let (folded_symtab, folded_littab) = fold_addresses(pass1);

    let csects = build_csect_info(pass1, &folded_symtab);

    let mut chunks = Vec::new();
    let mut gaps = Vec::new();
    let mut modifications = Vec::new();

    let mut current_csect = String::new();
    // spec.md §4.4: "a current base register value BASE_ADDR (initially 0)".
    // Each CSECT is independently relocatable, so a new CSECT reinitializes
    // it back to 0 rather than carrying over the previous section's base.
    let mut base_addr: u32 = 0;

    for record in &pass1.intermediate {
        if record.csect != current_csect {
            current_csect = record.csect.clone();
            base_addr = 0;
        }

        let flat_addr = fold(record.address, &record.block, &pass1.blocktab);

        match &record.kind {
            Kind::LiteralPool { raw } => {
                let lit = folded_littab.get(raw).expect("literal must be registered");
                chunks.push(Chunk {
                    csect: record.csect.clone(),
                    address: flat_addr,
                    bytes: lit.bytes.clone(),
                });
            }
            Kind::Line(parsed) => {
                process_line(
                    parsed,
                    record,
                    flat_addr,
                    optab,
                    &folded_symtab,
                    &folded_littab,
                    &pass1.extref,
                    &mut base_addr,
                    &mut chunks,
                    &mut gaps,
                    &mut modifications,
                )?;
            }
        }
    }

    log::debug!(
        "pass 2: complete, {} chunk(s), {} modification(s)",
        chunks.len(),
        modifications.len()
    );
    Ok(Pass2Output {
        folded_symtab,
        folded_littab,
        chunks,
        gaps,
        modifications,
        csects,
    })
}

fn fold(address: u32, block: &str, blocktab: &BlockTable) -> u32 {
    let base = blocktab.get(block).map(|b| b.base).unwrap_or(0);
    address + base
}

fn fold_addresses(pass1: &Pass1Output) -> (SymbolTable, LiteralTable) {
    let mut symtab = pass1.symtab.clone();
    for sym in symtab.iter_mut() {
        let base = pass1.blocktab.get(&sym.block).map(|b| b.base).unwrap_or(0);
        sym.value += base as i64;
    }

    let mut littab = pass1.littab.clone();
    for lit in littab.iter_mut() {
        if let Some(addr) = lit.pool_addr {
            let base = pass1.blocktab.get(&lit.block).map(|b| b.base).unwrap_or(0);
            lit.pool_addr = Some(addr + base);
        }
    }

    (symtab, littab)
}

fn build_csect_info(pass1: &Pass1Output, folded_symtab: &SymbolTable) -> Vec<CsectInfo> {
    pass1
        .csect_order
        .iter()
        .map(|name| {
            let start_address = *pass1.start_address.get(name).unwrap_or(&0);
            let extdef = pass1
                .extdef
                .get(name)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|sym_name| {
                    folded_symtab
                        .resolve(name, &sym_name)
                        .map(|sym| (sym_name, sym.value as u32))
                })
                .collect();
            let extref = pass1.extref.get(name).cloned().unwrap_or_default();

            // `csect_length` sums each block's final location counter,
            // which for the CSECT seeded by `START` already carries that
            // absolute offset baked in; subtract it back out so `length`
            // is a byte count, not an end address.
            CsectInfo {
                name: name.clone(),
                start_address,
                length: pass1.blocktab.csect_length(name) - start_address,
                has_entry: pass1.start_address.contains_key(name),
                extdef,
                extref,
            }
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn process_line(
    parsed: &ParsedLine,
    record: &IntermediateRecord,
    flat_addr: u32,
    optab: &OpcodeTable,
    folded_symtab: &SymbolTable,
    folded_littab: &LiteralTable,
    extref: &HashMap<String, Vec<String>>,
    base_addr: &mut u32,
    chunks: &mut Vec<Chunk>,
    gaps: &mut Vec<Gap>,
    modifications: &mut Vec<Modification>,
) -> Result<(), AssembleError> {
    match parsed.mnemonic.as_str() {
        "BASE" => {
            let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
                line: record.line_number,
                reason: "BASE requires an operand".to_string(),
            })?;
            let value = resolve_base_expr(operand, &record.csect, folded_symtab, extref, record.line_number)?;
            log::trace!("line {}: BASE set to {:#06X}", record.line_number, value);
            *base_addr = value;
        }
        "NOBASE" => {
            log::trace!("line {}: NOBASE clears base register", record.line_number);
            *base_addr = 0;
        }
        "RESW" | "RESB" => {
            gaps.push(Gap {
                csect: record.csect.clone(),
                address: flat_addr,
            });
        }
        "WORD" => {
            let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
                line: record.line_number,
                reason: "WORD requires an operand".to_string(),
            })?;
            let (value, modification) =
                encode_word(operand, &record.csect, flat_addr, folded_symtab, extref, record.line_number)?;
            chunks.push(Chunk {
                csect: record.csect.clone(),
                address: flat_addr,
                bytes: numlit::word_bytes(value),
            });
            if let Some(m) = modification {
                modifications.push(m);
            }
        }
        "BYTE" => {
            let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
                line: record.line_number,
                reason: "BYTE requires an operand".to_string(),
            })?;
            let bytes = numlit::decode_byte_operand(operand).map_err(|_| {
                AssembleError::InvalidByteOperand {
                    line: record.line_number,
                    operand: operand.to_string(),
                }
            })?;
            chunks.push(Chunk {
                csect: record.csect.clone(),
                address: flat_addr,
                bytes,
            });
        }
        mnemonic => {
            if let Some(entry) = optab.get(mnemonic) {
                let (bytes, modification) = encode_instruction(
                    entry,
                    parsed,
                    record,
                    flat_addr,
                    folded_symtab,
                    folded_littab,
                    extref,
                    *base_addr,
                )?;
                chunks.push(Chunk {
                    csect: record.csect.clone(),
                    address: flat_addr,
                    bytes,
                });
                if let Some(m) = modification {
                    modifications.push(m);
                }
            }
            // CSECT / USE / EXTDEF / EXTREF / EQU / LTORG / END / START:
            // address-bearing side effects only, already folded into the
            // symbol/literal tables and CSECT metadata by Pass 1.
        }
    }
    Ok(())
}

enum Target {
    Constant(i64),
    Resolved { value: i64, external: bool, name: String },
}

/// One term of a `WORD A ± B` expression (spec.md §4.4 `WORD`).
enum WordTerm {
    Const(i64),
    Local(i64),
    External(String),
}

fn classify_word_term(
    token: &str,
    csect: &str,
    folded_symtab: &SymbolTable,
    extref: &HashMap<String, Vec<String>>,
    line: usize,
) -> Result<WordTerm, AssembleError> {
    if let Ok(n) = token.parse::<i64>() {
        return Ok(WordTerm::Const(n));
    }
    if let Some(sym) = folded_symtab.resolve(csect, token) {
        return Ok(WordTerm::Local(sym.value));
    }
    if extref.get(csect).map(|names| names.iter().any(|n| n == token)).unwrap_or(false) {
        return Ok(WordTerm::External(token.to_string()));
    }
    Err(AssembleError::UndefinedSymbol {
        line,
        symbol: token.to_string(),
    })
}

/// Splits an expression into two terms and the connecting `+`/`-`, the
/// same way `pass1::eval_equ_expr` does for `EQU`. Returns `None` for a
/// bare single-token expression.
fn split_binary_expr(expr: &str) -> Option<(&str, char, &str)> {
    let pos = expr
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '+' || c == '-')
        .map(|(pos, _)| pos)?;
    let (a, rest) = expr.split_at(pos);
    let (op, b) = rest.split_at(1);
    Some((a.trim(), op.chars().next().unwrap(), b.trim()))
}

/// Encodes a `WORD` operand per spec.md §4.4: a bare integer or symbol
/// resolves directly; an `A ± B` expression where either side is an
/// `EXTREF` name resolves the local side and queues a length-6
/// modification record for the external side.
fn encode_word(
    operand: &str,
    csect: &str,
    flat_addr: u32,
    folded_symtab: &SymbolTable,
    extref: &HashMap<String, Vec<String>>,
    line: usize,
) -> Result<(i64, Option<Modification>), AssembleError> {
    let operand = operand.trim();

    if let Some((a, op, b)) = split_binary_expr(operand) {
        let a_term = classify_word_term(a, csect, folded_symtab, extref, line)?;
        let b_term = classify_word_term(b, csect, folded_symtab, extref, line)?;

        let mut local_sum = 0i64;
        let mut modification = None;
        for (term, sign) in [(a_term, '+'), (b_term, if op == '-' { '-' } else { '+' })] {
            match term {
                WordTerm::Const(v) | WordTerm::Local(v) => {
                    local_sum += if sign == '-' { -v } else { v };
                }
                WordTerm::External(name) => {
                    modification = Some(Modification {
                        csect: csect.to_string(),
                        address: flat_addr,
                        half_bytes: 6,
                        sign,
                        symbol: name,
                    });
                }
            }
        }
        return Ok((local_sum, modification));
    }

    match classify_word_term(operand, csect, folded_symtab, extref, line)? {
        WordTerm::Const(v) | WordTerm::Local(v) => Ok((v, None)),
        WordTerm::External(name) => Ok((
            0,
            Some(Modification {
                csect: csect.to_string(),
                address: flat_addr,
                half_bytes: 6,
                sign: '+',
                symbol: name,
            }),
        )),
    }
}

/// Parses a `*`-relative operand (`*`, `*+k`, `*-k`) into its offset `k`,
/// per spec.md §4.4 format-3 target resolution step 4.
fn parse_star_relative(sym_part: &str) -> Option<i64> {
    if sym_part == "*" {
        return Some(0);
    }
    if let Some(rest) = sym_part.strip_prefix("*+") {
        return rest.parse().ok();
    }
    if let Some(rest) = sym_part.strip_prefix("*-") {
        return rest.parse::<i64>().ok().map(|v| -v);
    }
    None
}

fn encode_instruction(
    entry: &OpcodeEntry,
    parsed: &ParsedLine,
    record: &IntermediateRecord,
    flat_addr: u32,
    folded_symtab: &SymbolTable,
    folded_littab: &LiteralTable,
    extref: &HashMap<String, Vec<String>>,
    base_addr: u32,
) -> Result<(Vec<u8>, Option<Modification>), AssembleError> {
    if entry.is_format1() {
        return Ok((vec![entry.numeric_code], None));
    }

    if entry.is_format2() {
        let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
            line: record.line_number,
            reason: format!("{} requires two register operands", parsed.mnemonic),
        })?;
        let mut regs = operand.split(',').map(|r| r.trim().to_uppercase());
        let r1 = regs
            .next()
            .and_then(|r| register_code(&r))
            .ok_or_else(|| AssembleError::MalformedLine {
                line: record.line_number,
                reason: format!("invalid register operand '{}'", operand),
            })?;
        let r2 = regs.next().and_then(|r| register_code(&r)).unwrap_or(0);
        let obj = ((entry.numeric_code as u16) << 8) | ((r1 as u16) << 4) | r2 as u16;
        return Ok((obj.to_be_bytes().to_vec(), None));
    }

    // Format 3/4.
    let mut x: u8 = 0;
    let (n, i, target) = match &parsed.operand {
        None => (1u8, 1u8, Target::Constant(0)),
        Some(raw_operand) => {
            let (operand, indexed) = match raw_operand.strip_suffix(",X") {
                Some(rest) => (rest, true),
                None => (raw_operand.as_str(), false),
            };
            x = indexed as u8;

            let (n, i, sym_part) = if let Some(rest) = operand.strip_prefix('#') {
                (0u8, 1u8, rest)
            } else if let Some(rest) = operand.strip_prefix('@') {
                (1u8, 0u8, rest)
            } else {
                (1u8, 1u8, operand)
            };

            let target = if n == 0 {
                if let Ok(constant) = sym_part.parse::<i64>() {
                    Target::Constant(constant)
                } else {
                    resolve_format3_operand(
                        sym_part,
                        &record.csect,
                        folded_symtab,
                        folded_littab,
                        extref,
                        record.line_number,
                    )?
                }
            } else if let Some(k) = parse_star_relative(sym_part) {
                Target::Resolved {
                    value: flat_addr as i64 + k,
                    external: false,
                    name: "*".to_string(),
                }
            } else {
                resolve_format3_operand(
                    sym_part,
                    &record.csect,
                    folded_symtab,
                    folded_littab,
                    extref,
                    record.line_number,
                )?
            };
            (n, i, target)
        }
    };

    if parsed.extended {
        encode_format4(entry, n, i, x, target, record, flat_addr)
    } else {
        encode_format3(entry, n, i, x, target, record, flat_addr, base_addr)
    }
}

fn resolve_target(
    sym_part: &str,
    csect: &str,
    folded_symtab: &SymbolTable,
    extref: &HashMap<String, Vec<String>>,
    line: usize,
) -> Result<Target, AssembleError> {
    if let Some(sym) = folded_symtab.resolve(csect, sym_part) {
        return Ok(Target::Resolved {
            value: sym.value,
            external: false,
            name: csect.to_string(),
        });
    }
    if extref.get(csect).map(|names| names.iter().any(|n| n == sym_part)).unwrap_or(false) {
        return Ok(Target::Resolved {
            value: 0,
            external: true,
            name: sym_part.to_string(),
        });
    }
    Err(AssembleError::UndefinedSymbol {
        line,
        symbol: sym_part.to_string(),
    })
}

/// Narrows a `WordTerm` to a plain value, rejecting an `EXTREF` term: BASE
/// and `#`-immediate expressions have no modification-record mechanism to
/// carry an external reference the way `WORD` does.
fn require_local_term(term: WordTerm, line: usize) -> Result<i64, AssembleError> {
    match term {
        WordTerm::Const(v) | WordTerm::Local(v) => Ok(v),
        WordTerm::External(name) => Err(AssembleError::MalformedLine {
            line,
            reason: format!("external reference '{}' cannot appear in this expression", name),
        }),
    }
}

/// Resolves a `=...` literal operand to its block-folded pool address, per
/// spec.md §4.4 step 4's literal-operand bullet.
fn resolve_literal_target(raw: &str, folded_littab: &LiteralTable, line: usize) -> Result<Target, AssembleError> {
    let lit = folded_littab.get(raw).ok_or_else(|| AssembleError::UndefinedSymbol {
        line,
        symbol: format!("={}", raw),
    })?;
    let addr = lit.pool_addr.ok_or_else(|| AssembleError::UndefinedSymbol {
        line,
        symbol: format!("={}", raw),
    })?;
    Ok(Target::Resolved {
        value: addr as i64,
        external: false,
        name: format!("={}", raw),
    })
}

/// Resolves a format-3/4 operand (after the `#`/`@` prefix and `*`-relative
/// cases have already been stripped): a literal, an `A ± B` expression
/// (spec.md §8 scenario 2), or a plain symbol/EXTREF name.
fn resolve_format3_operand(
    sym_part: &str,
    csect: &str,
    folded_symtab: &SymbolTable,
    folded_littab: &LiteralTable,
    extref: &HashMap<String, Vec<String>>,
    line: usize,
) -> Result<Target, AssembleError> {
    if let Some(raw) = sym_part.strip_prefix('=') {
        return resolve_literal_target(raw, folded_littab, line);
    }
    if let Some((a, op, b)) = split_binary_expr(sym_part) {
        let a_val = require_local_term(classify_word_term(a, csect, folded_symtab, extref, line)?, line)?;
        let b_val = require_local_term(classify_word_term(b, csect, folded_symtab, extref, line)?, line)?;
        let value = if op == '-' { a_val - b_val } else { a_val + b_val };
        return Ok(Target::Resolved {
            value,
            external: false,
            name: sym_part.to_string(),
        });
    }
    resolve_target(sym_part, csect, folded_symtab, extref, line)
}

/// Resolves a `BASE` operand, which may be a plain symbol or an `A ± B`
/// expression (spec.md §8 scenario 2: `BASE BUFEND-BUFFER`).
fn resolve_base_expr(
    expr: &str,
    csect: &str,
    folded_symtab: &SymbolTable,
    extref: &HashMap<String, Vec<String>>,
    line: usize,
) -> Result<u32, AssembleError> {
    let expr = expr.trim();
    if let Some((a, op, b)) = split_binary_expr(expr) {
        let a_val = require_local_term(classify_word_term(a, csect, folded_symtab, extref, line)?, line)?;
        let b_val = require_local_term(classify_word_term(b, csect, folded_symtab, extref, line)?, line)?;
        let value = if op == '-' { a_val - b_val } else { a_val + b_val };
        return Ok(value as u32);
    }
    require_local_term(classify_word_term(expr, csect, folded_symtab, extref, line)?, line).map(|v| v as u32)
}

fn encode_format4(
    entry: &OpcodeEntry,
    n: u8,
    i: u8,
    x: u8,
    target: Target,
    record: &IntermediateRecord,
    flat_addr: u32,
) -> Result<(Vec<u8>, Option<Modification>), AssembleError> {
    let (addr_field, modification) = match target {
        Target::Constant(value) => ((value as u32) & 0xFFFFF, None),
        Target::Resolved { value, external, name } => {
            // Only an EXTREF operand needs a modification record: spec.md
            // §8 counts M-records as exactly the format-4/EXTREF and
            // external-WORD cases, not every format-4 instruction.
            let modification = external.then(|| Modification {
                csect: record.csect.clone(),
                address: flat_addr + 1,
                half_bytes: 5,
                sign: '+',
                symbol: name,
            });
            ((value as u32) & 0xFFFFF, modification)
        }
    };

    let (b, p, e) = (0u8, 0u8, 1u8);
    let first_byte = entry.numeric_code | (n << 1) | i;
    let second_byte = (x << 7) | (b << 6) | (p << 5) | (e << 4) | (((addr_field >> 16) & 0xF) as u8);
    let third_byte = ((addr_field >> 8) & 0xFF) as u8;
    let fourth_byte = (addr_field & 0xFF) as u8;

    Ok((vec![first_byte, second_byte, third_byte, fourth_byte], modification))
}

fn encode_format3(
    entry: &OpcodeEntry,
    n: u8,
    i: u8,
    x: u8,
    target: Target,
    record: &IntermediateRecord,
    flat_addr: u32,
    base_addr: u32,
) -> Result<(Vec<u8>, Option<Modification>), AssembleError> {
    let (b, p, disp) = match target {
        Target::Constant(value) => {
            if !(0..=4095).contains(&value) {
                return Err(AssembleError::DisplacementOutOfRange {
                    line: record.line_number,
                    symbol: "#".to_string(),
                    disp: value,
                });
            }
            (0u8, 0u8, value)
        }
        Target::Resolved { value, external, name } => {
            if external {
                return Err(AssembleError::MalformedLine {
                    line: record.line_number,
                    reason: format!(
                        "external reference '{}' must use extended (format 4) addressing",
                        name
                    ),
                });
            }
            let pc = flat_addr as i64 + 3;
            let pc_disp = value - pc;
            if (-2048..=2047).contains(&pc_disp) {
                (0u8, 1u8, pc_disp)
            } else {
                let base_disp = value - base_addr as i64;
                if (0..=4095).contains(&base_disp) {
                    (1u8, 0u8, base_disp)
                } else {
                    return Err(AssembleError::DisplacementOutOfRange {
                        line: record.line_number,
                        symbol: name,
                        disp: pc_disp,
                    });
                }
            }
        }
    };

    let e = 0u8;
    let disp_field = (disp as i32 & 0xFFF) as u32;
    let first_byte = entry.numeric_code | (n << 1) | i;
    let second_byte = (x << 7) | (b << 6) | (p << 5) | (e << 4) | (((disp_field >> 8) & 0xF) as u8);
    let third_byte = (disp_field & 0xFF) as u8;

    Ok((vec![first_byte, second_byte, third_byte], None))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pass1;

    fn optab() -> OpcodeTable {
        OpcodeTable::parse(
            "name,opcode,format\n\
             STL,14,3/4\n\
             LDA,00,3/4\n\
             LDT,74,3/4\n\
             LDB,68,3/4\n\
             RSUB,4C,3\n\
             ADDR,90,2\n\
             FIX,C4,1\n",
        )
        .unwrap()
    }

    fn lines(src: &str) -> Vec<String> {
        src.lines().map(|s| s.to_string()).collect()
    }

    #[test]
    fn encodes_simple_pc_relative_instruction() {
        let optab = optab();
        let src = lines(
            "COPY START 1000\n\
             FIRST STL RETADR\n\
             RETADR RESW 1\n\
             END FIRST",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();

        let chunk = p2.chunks.iter().find(|c| c.address == 1000).unwrap();
        // RETADR sits immediately after this 3-byte instruction, so its
        // PC-relative displacement is 0: n=i=1 (0x17), p=1 (0x20), disp=0.
        assert_eq!(chunk.bytes, vec![0x17, 0x20, 0x00]);
    }

    #[test]
    fn encodes_format2_register_pair() {
        let optab = optab();
        let src = lines("PROG START 0\nADDR A,X\nEND");
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();

        let chunk = p2.chunks.iter().find(|c| c.address == 0).unwrap();
        assert_eq!(chunk.bytes, vec![0x90, 0x01]);
    }

    #[test]
    fn format1_has_no_operand_bytes() {
        let optab = optab();
        let src = lines("PROG START 0\nFIX\nEND");
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();

        let chunk = p2.chunks.iter().find(|c| c.address == 0).unwrap();
        assert_eq!(chunk.bytes, vec![0xC4]);
    }

    #[test]
    fn extended_format_sets_e_bit_with_no_modification_for_a_local_symbol() {
        let optab = optab();
        let src = lines(
            "PROG START 0\n\
             FIRST +LDT BUFEND\n\
             BUFEND RESB 4096\n\
             END FIRST",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();

        let chunk = p2.chunks.iter().find(|c| c.address == 0).unwrap();
        assert_eq!(chunk.bytes[0], 0x77); // LDT (0x74) with n=i=1
        assert_eq!(chunk.bytes[1] & 0x10, 0x10); // e bit
        // BUFEND is a local symbol, not an EXTREF: spec.md §8 counts
        // M-records only for EXTREF operands, so none is queued here.
        assert_eq!(p2.modifications.len(), 0);
    }

    #[test]
    fn default_base_of_zero_falls_back_when_in_range() {
        // spec.md §4.4: BASE_ADDR starts at 0, so with no BASE directive a
        // target too far for PC-relative still resolves base-relative
        // against that implicit 0.
        let optab = optab();
        let src = lines(
            "PROG START 0\n\
             FIRST LDA FAR\n\
             GAP RESB 3000\n\
             FAR RESB 1\n\
             END FIRST",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();
        let chunk = p2.chunks.iter().find(|c| c.address == 0).unwrap();
        assert_eq!(chunk.bytes[1] & 0x40, 0x40); // b bit set
        assert_eq!(chunk.bytes[1] & 0x20, 0); // p bit clear
    }

    #[test]
    fn out_of_range_displacement_without_base_is_fatal() {
        let optab = optab();
        let src = lines(
            "PROG START 0\n\
             FIRST LDA FAR\n\
             GAP RESB 5000\n\
             FAR RESB 1\n\
             END FIRST",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let err = run(&p1, &optab).unwrap_err();
        assert!(matches!(err, AssembleError::DisplacementOutOfRange { .. }));
    }

    #[test]
    fn base_relative_falls_back_when_in_range() {
        let optab = optab();
        let src = lines(
            "PROG START 0\n\
             BASE NEAR\n\
             FIRST LDA FAR\n\
             GAP RESB 3000\n\
             NEAR EQU *\n\
             FAR RESB 1\n\
             END FIRST",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();
        // FAR (address 3003) is too far from FIRST's PC (address 3) for
        // format-3 PC-relative addressing; NEAR (also 3003) is the base.
        let chunk = p2.chunks.iter().find(|c| c.address == 0).unwrap();
        assert_eq!(chunk.bytes[1] & 0x40, 0x40); // b bit set
        assert_eq!(chunk.bytes[1] & 0x20, 0); // p bit clear
    }

    #[test]
    fn external_reference_requires_extended_format() {
        let optab = optab();
        let src = lines(
            "PROG CSECT\n\
             EXTREF RDREC\n\
             LDA RDREC\n\
             END",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let err = run(&p1, &optab).unwrap_err();
        assert!(matches!(err, AssembleError::MalformedLine { .. }));
    }

    #[test]
    fn extended_external_reference_queues_modification_with_symbol_name() {
        let optab = optab();
        let src = lines(
            "PROG CSECT\n\
             EXTREF RDREC\n\
             +LDA RDREC\n\
             END",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();
        assert_eq!(p2.modifications[0].symbol, "RDREC");
    }

    #[test]
    fn star_relative_operand_targets_current_locctr() {
        let optab = optab();
        let src = lines("PROG START 0\nFIRST LDA *\nEND FIRST");
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();

        // target = flat_addr + 0 = 0; disp = 0 - (0+3) = -3.
        let chunk = p2.chunks.iter().find(|c| c.address == 0).unwrap();
        let disp = (((chunk.bytes[1] & 0x0F) as i32) << 8) | chunk.bytes[2] as i32;
        let disp = if disp & 0x800 != 0 { disp - 0x1000 } else { disp };
        assert_eq!(disp, -3);
    }

    #[test]
    fn word_with_external_operand_queues_length_six_modification() {
        let optab = optab();
        let src = lines(
            "PROG CSECT\n\
             EXTREF BUFEND\n\
             FIRST WORD BUFEND-FIRST\n\
             END",
        );
        let p1 = pass1::run(&src, &optab).unwrap();
        let p2 = run(&p1, &optab).unwrap();

        assert_eq!(p2.modifications.len(), 1);
        assert_eq!(p2.modifications[0].half_bytes, 6);
        assert_eq!(p2.modifications[0].symbol, "BUFEND");
        assert_eq!(p2.modifications[0].sign, '+');
    }
}
