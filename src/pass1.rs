//! Pass 1 driver: address assignment, per spec.md §4.3.

use std::collections::HashMap;

use crate::blocktab::BlockTable;
use crate::error::AssembleError;
use crate::intermediate::{IntermediateRecord, Kind};
use crate::line::{self, ParsedLine};
use crate::littab::LiteralTable;
use crate::numlit;
use crate::opcode::OpcodeTable;
use crate::symtab::SymbolTable;

/// Directives that consume no operand-driven location-counter advance and
/// carry no symbol/literal/opcode meaning of their own; Pass 1 still
/// records an intermediate line for them so Pass 2 and the listing see
/// them (Pass 2 needs `BASE`/`NOBASE` to track the base register).
const NOOP_DIRECTIVES: &[&str] = &["BASE", "NOBASE"];

/// Above this many bytes, a `RESW`/`RESB` reservation triggers the
/// "flush literals first" heuristic documented in spec.md §4.3 step 8 /
/// §9 (a pragmatic, non-canonical choice kept as specified).
const LARGE_RESERVATION_THRESHOLD: u32 = 100;

pub struct Pass1Output {
    pub symtab: SymbolTable,
    pub littab: LiteralTable,
    pub blocktab: BlockTable,
    pub intermediate: Vec<IntermediateRecord>,
    /// Control sections in first-seen order.
    pub csect_order: Vec<String>,
    pub start_address: HashMap<String, u32>,
    pub extdef: HashMap<String, Vec<String>>,
    pub extref: HashMap<String, Vec<String>>,
}

struct State {
    current_csect: String,
    current_block: String,
}

pub fn run(lines: &[String], optab: &OpcodeTable) -> Result<Pass1Output, AssembleError> {
    log::debug!("pass 1: walking {} expanded lines", lines.len());
    let mut symtab = SymbolTable::new();
    let mut littab = LiteralTable::new();
    let mut blocktab = BlockTable::new();
    let mut intermediate = Vec::new();
    let mut csect_order: Vec<String> = Vec::new();
    let mut start_address: HashMap<String, u32> = HashMap::new();
    let mut extdef: HashMap<String, Vec<String>> = HashMap::new();
    let mut extref: HashMap<String, Vec<String>> = HashMap::new();

    let mut state = State {
        current_csect: String::new(),
        current_block: String::new(),
    };

    let mut first_line_seen = false;

    for (idx, raw) in lines.iter().enumerate() {
        let line_number = idx + 1;
        let parsed = match line::parse_line(raw) {
            Some(p) => p,
            None => continue,
        };

        if !first_line_seen {
            first_line_seen = true;
            if parsed.mnemonic == "START" {
                handle_start(
                    &parsed,
                    line_number,
                    &mut state,
                    &mut blocktab,
                    &mut csect_order,
                    &mut start_address,
                    &mut intermediate,
                )?;
                continue;
            } else if parsed.mnemonic != "CSECT" {
                // A program that opens with neither `START` nor `CSECT`
                // (no declared absolute origin or section name) still
                // needs an implicit home for its first block.
                state.current_csect = "DEFAULT".to_string();
                state.current_block = "DEFAULT".to_string();
                blocktab.get_or_create_csect("DEFAULT");
                csect_order.push("DEFAULT".to_string());
            }
        }

        match parsed.mnemonic.as_str() {
            "CSECT" => {
                let name = parsed
                    .label
                    .clone()
                    .or_else(|| parsed.operand.clone())
                    .ok_or_else(|| AssembleError::MalformedLine {
                        line: line_number,
                        reason: "CSECT requires a name".to_string(),
                    })?;
                log::debug!("line {}: entering CSECT {}", line_number, name);
                state.current_csect = name.clone();
                state.current_block = name.clone();
                if !csect_order.contains(&name) {
                    csect_order.push(name.clone());
                }
                blocktab.get_or_create_csect(&name);
                push_record(&mut intermediate, line_number, &state, &blocktab, Kind::Line(parsed));
            }
            "USE" => {
                let tag = parsed.operand.clone();
                let name = blocktab
                    .get_or_create_use(&state.current_csect, tag.as_deref())
                    .name
                    .clone();
                log::debug!("line {}: switching to block {}", line_number, name);
                state.current_block = name;
                push_record(&mut intermediate, line_number, &state, &blocktab, Kind::Line(parsed));
            }
            "EXTDEF" => {
                let names = comma_split(parsed.operand.as_deref().unwrap_or(""));
                extdef
                    .entry(state.current_csect.clone())
                    .or_default()
                    .extend(names);
                push_record(&mut intermediate, line_number, &state, &blocktab, Kind::Line(parsed));
            }
            "EXTREF" => {
                let names = comma_split(parsed.operand.as_deref().unwrap_or(""));
                extref
                    .entry(state.current_csect.clone())
                    .or_default()
                    .extend(names);
                push_record(&mut intermediate, line_number, &state, &blocktab, Kind::Line(parsed));
            }
            _ => {
                let is_end = parsed.mnemonic == "END";
                process_ordinary_line(
                    parsed,
                    line_number,
                    &mut state,
                    optab,
                    &mut symtab,
                    &mut littab,
                    &mut blocktab,
                    &mut intermediate,
                )?;

                if is_end {
                    break;
                }
            }
        }
    }

    blocktab.finalize_sizes();
    blocktab.assign_bases();
    log::debug!("pass 1: complete, {} control section(s)", csect_order.len());

    Ok(Pass1Output {
        symtab,
        littab,
        blocktab,
        intermediate,
        csect_order,
        start_address,
        extdef,
        extref,
    })
}

fn handle_start(
    parsed: &ParsedLine,
    line_number: usize,
    state: &mut State,
    blocktab: &mut BlockTable,
    csect_order: &mut Vec<String>,
    start_address: &mut HashMap<String, u32>,
    intermediate: &mut Vec<IntermediateRecord>,
) -> Result<(), AssembleError> {
    let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
        line: line_number,
        reason: "START requires an address operand".to_string(),
    })?;
    let addr: u32 = operand.parse().map_err(|_| AssembleError::MalformedLine {
        line: line_number,
        reason: format!("START operand '{}' is not an integer", operand),
    })?;

    let name = parsed.label.clone().unwrap_or_else(|| "DEFAULT".to_string());
    state.current_csect = name.clone();
    state.current_block = name.clone();
    csect_order.push(name.clone());

    let block = blocktab.get_or_create_csect(&name);
    block.locctr = addr;
    start_address.insert(name.clone(), addr);

    push_record(
        intermediate,
        line_number,
        state,
        blocktab,
        Kind::Line(parsed.clone()),
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn process_ordinary_line(
    parsed: ParsedLine,
    line_number: usize,
    state: &mut State,
    optab: &OpcodeTable,
    symtab: &mut SymbolTable,
    littab: &mut LiteralTable,
    blocktab: &mut BlockTable,
    intermediate: &mut Vec<IntermediateRecord>,
) -> Result<(), AssembleError> {
    let is_equ = parsed.mnemonic == "EQU";

    // A large RESW/RESB flushes pending literals as if an LTORG had
    // preceded it (spec.md §4.3 step 8). That flush must happen *before*
    // this line's own label is bound, or the label would collide with
    // the literal pool it just displaced.
    let reservation_bytes = match parsed.mnemonic.as_str() {
        "RESW" => Some(3 * parse_count(&parsed, line_number)?),
        "RESB" => Some(parse_count(&parsed, line_number)?),
        _ => None,
    };
    if let Some(bytes) = reservation_bytes {
        maybe_flush_before_reservation(bytes, state, littab, blocktab, intermediate, line_number)?;
    }

    if let Some(label) = &parsed.label {
        if !is_equ {
            let addr = blocktab.get(&state.current_block).unwrap().locctr as i64;
            log::trace!("line {}: binding {}.{} = {:#06X}", line_number, state.current_csect, label, addr);
            symtab.define(&state.current_csect, label, &state.current_block, addr, line_number)?;
        }
    }

    if let Some(operand) = &parsed.operand {
        if let Some(raw) = operand.strip_prefix('=') {
            littab.register(raw, &state.current_block, line_number)?;
        }
    }

    if let Some(entry) = optab.get(&parsed.mnemonic) {
        let advance = if entry.is_format1() {
            1
        } else if entry.is_format2() {
            2
        } else if parsed.extended {
            4
        } else {
            3
        };
        blocktab.get_mut(&state.current_block).unwrap().locctr += advance;
    } else {
        match parsed.mnemonic.as_str() {
            "WORD" => {
                blocktab.get_mut(&state.current_block).unwrap().locctr += 3;
            }
            "RESW" | "RESB" => {
                let bytes = reservation_bytes.expect("computed above for RESW/RESB");
                blocktab.get_mut(&state.current_block).unwrap().locctr += bytes;
            }
            "BYTE" => {
                let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
                    line: line_number,
                    reason: "BYTE requires an operand".to_string(),
                })?;
                let len = numlit::byte_operand_length(operand).map_err(|_| {
                    AssembleError::InvalidByteOperand {
                        line: line_number,
                        operand: operand.to_string(),
                    }
                })?;
                blocktab.get_mut(&state.current_block).unwrap().locctr += len;
            }
            "EQU" => {
                let label = parsed.label.clone().ok_or_else(|| AssembleError::MalformedLine {
                    line: line_number,
                    reason: "EQU requires a label".to_string(),
                })?;
                let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
                    line: line_number,
                    reason: "EQU requires an operand".to_string(),
                })?;
                let locctr = blocktab.get(&state.current_block).unwrap().locctr;
                let value = eval_equ_expr(operand, symtab, &state.current_csect, locctr, line_number)?;
                symtab.define(&state.current_csect, &label, &state.current_block, value, line_number)?;
            }
            "LTORG" | "END" => {
                flush_literals(state, littab, blocktab, intermediate, line_number)?;
            }
            directive if NOOP_DIRECTIVES.contains(&directive) => {}
            other => {
                return Err(AssembleError::InvalidOpcode {
                    line: line_number,
                    mnemonic: other.to_string(),
                });
            }
        }
    }

    push_record(intermediate, line_number, state, blocktab, Kind::Line(parsed));
    Ok(())
}

fn parse_count(parsed: &ParsedLine, line_number: usize) -> Result<u32, AssembleError> {
    let operand = parsed.operand.as_deref().ok_or_else(|| AssembleError::MalformedLine {
        line: line_number,
        reason: format!("{} requires a count operand", parsed.mnemonic),
    })?;
    operand.parse().map_err(|_| AssembleError::MalformedLine {
        line: line_number,
        reason: format!("invalid count '{}' for {}", operand, parsed.mnemonic),
    })
}

fn maybe_flush_before_reservation(
    bytes: u32,
    state: &mut State,
    littab: &mut LiteralTable,
    blocktab: &mut BlockTable,
    intermediate: &mut Vec<IntermediateRecord>,
    line_number: usize,
) -> Result<(), AssembleError> {
    if bytes > LARGE_RESERVATION_THRESHOLD {
        flush_literals(state, littab, blocktab, intermediate, line_number)?;
    }
    Ok(())
}

fn flush_literals(
    state: &mut State,
    littab: &mut LiteralTable,
    blocktab: &mut BlockTable,
    intermediate: &mut Vec<IntermediateRecord>,
    line_number: usize,
) -> Result<(), AssembleError> {
    for raw in littab.pending() {
        let literal = littab.get(&raw).expect("pending literal must exist").clone();
        let addr = blocktab.get(&state.current_block).unwrap().locctr;
        littab.assign(&raw, &state.current_block, addr);
        blocktab.get_mut(&state.current_block).unwrap().locctr += literal.bytes.len() as u32;

        intermediate.push(IntermediateRecord {
            line_number,
            address: addr,
            block: state.current_block.clone(),
            csect: state.current_csect.clone(),
            kind: Kind::LiteralPool { raw },
        });
    }
    Ok(())
}

fn push_record(
    intermediate: &mut Vec<IntermediateRecord>,
    line_number: usize,
    state: &State,
    blocktab: &BlockTable,
    kind: Kind,
) {
    intermediate.push(IntermediateRecord {
        line_number,
        address: blocktab.get(&state.current_block).unwrap().locctr,
        block: state.current_block.clone(),
        csect: state.current_csect.clone(),
        kind,
    });
}

fn comma_split(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Evaluates an `EQU` expression: `*`, `A + B`/`A - B`, a plain integer, or
/// a plain symbol. Operands must already be defined — forward references
/// are rejected rather than silently miscomputed (spec.md §9).
fn eval_equ_expr(
    expr: &str,
    symtab: &SymbolTable,
    csect: &str,
    current_locctr: u32,
    line: usize,
) -> Result<i64, AssembleError> {
    let expr = expr.trim();
    if expr == "*" {
        return Ok(current_locctr as i64);
    }

    if let Some(pos) = expr
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '+' || c == '-')
        .map(|(pos, _)| pos)
    {
        let (a, rest) = expr.split_at(pos);
        let (op, b) = rest.split_at(1);
        let av = resolve_equ_operand(a.trim(), symtab, csect, line)?;
        let bv = resolve_equ_operand(b.trim(), symtab, csect, line)?;
        return Ok(if op == "+" { av + bv } else { av - bv });
    }

    resolve_equ_operand(expr, symtab, csect, line)
}

fn resolve_equ_operand(
    token: &str,
    symtab: &SymbolTable,
    csect: &str,
    line: usize,
) -> Result<i64, AssembleError> {
    if let Ok(n) = token.parse::<i64>() {
        return Ok(n);
    }
    symtab
        .resolve(csect, token)
        .map(|sym| sym.value)
        .ok_or_else(|| AssembleError::UndefinedSymbol {
            line,
            symbol: token.to_string(),
        })
}
