//! Assembles Pass 2's output into the object program's text form, per
//! spec.md §4.4/§4.5 (H/D/R/T/M/E records, one group per control section).

use crate::pass1::Pass1Output;
use crate::pass2::{Chunk, CsectInfo, Modification, Pass2Output};

const MAX_TEXT_RECORD_BYTES: usize = 30;

/// Builds the full object program text: every control section's H, D, R,
/// T, M and E records, one group per CSECT in declaration order,
/// concatenated with newlines.
pub fn assemble(pass1: &Pass1Output, pass2: &Pass2Output) -> String {
    let mut out = Vec::new();

    for csect in &pass2.csects {
        out.push(header_record(csect));

        if !csect.extdef.is_empty() {
            out.push(definition_record(csect));
        }
        if !csect.extref.is_empty() {
            out.push(reference_record(csect));
        }

        out.extend(text_records(csect, &pass2.chunks, &pass2.gaps));

        for m in pass2.modifications.iter().filter(|m| m.csect == csect.name) {
            out.push(modification_record(m));
        }

        out.push(end_record(csect));
    }

    let _ = pass1;
    out.join("\n")
}

fn header_record(csect: &CsectInfo) -> String {
    format!(
        "H{:<6}{:06X}{:06X}",
        truncate6(&csect.name),
        csect.start_address,
        csect.length
    )
}

fn definition_record(csect: &CsectInfo) -> String {
    let mut rec = String::from("D");
    for (name, address) in &csect.extdef {
        rec.push_str(&format!("{:<6}{:06X}", truncate6(name), address));
    }
    rec
}

fn reference_record(csect: &CsectInfo) -> String {
    let mut rec = String::from("R");
    for name in &csect.extref {
        rec.push_str(&format!("{:<6}", truncate6(name)));
    }
    rec
}

fn modification_record(m: &Modification) -> String {
    format!("M{:06X}{:02X}{}{:<6}", m.address, m.half_bytes, m.sign, truncate6(&m.symbol))
}

fn end_record(csect: &CsectInfo) -> String {
    if csect.has_entry {
        format!("E{:06X}", csect.start_address)
    } else {
        "E".to_string()
    }
}

/// Packs one CSECT's chunks into `T` records, each at most
/// `MAX_TEXT_RECORD_BYTES` bytes, breaking early whenever a `RESW`/`RESB`
/// gap interrupts the run of contiguous addresses (spec.md §4.4).
fn text_records(csect: &CsectInfo, chunks: &[Chunk], gaps: &[crate::pass2::Gap]) -> Vec<String> {
    let mut events: Vec<(u32, Option<&[u8]>)> = chunks
        .iter()
        .filter(|c| c.csect == csect.name)
        .map(|c| (c.address, Some(c.bytes.as_slice())))
        .chain(gaps.iter().filter(|g| g.csect == csect.name).map(|g| (g.address, None)))
        .collect();
    events.sort_by_key(|(addr, _)| *addr);

    let mut records = Vec::new();
    let mut current_start: Option<u32> = None;
    let mut current_bytes: Vec<u8> = Vec::new();

    for (address, bytes) in events {
        match bytes {
            None => {
                flush(&mut records, &mut current_start, &mut current_bytes);
            }
            Some(bytes) => {
                if current_bytes.len() + bytes.len() > MAX_TEXT_RECORD_BYTES {
                    flush(&mut records, &mut current_start, &mut current_bytes);
                }
                if current_start.is_none() {
                    current_start = Some(address);
                }
                current_bytes.extend_from_slice(bytes);
            }
        }
    }
    flush(&mut records, &mut current_start, &mut current_bytes);

    records
}

fn flush(records: &mut Vec<String>, start: &mut Option<u32>, bytes: &mut Vec<u8>) {
    if let Some(addr) = start.take() {
        if !bytes.is_empty() {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            records.push(format!("T{:06X}{:02X}{}", addr, bytes.len(), hex));
        }
    }
    bytes.clear();
}

fn truncate6(s: &str) -> String {
    if s.len() > 6 {
        s[..6].to_string()
    } else {
        s.to_string()
    }
}
