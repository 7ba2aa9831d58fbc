//! Textual macro expansion, per spec.md §4.2.
//!
//! Macros are recognized and expanded in a single left-to-right walk of
//! the raw line stream: definitions are strictly non-recursive and must
//! precede any invocation (a macro body may not invoke a macro defined
//! later, and nested `MACRO` definitions are not supported).

use std::collections::HashMap;

use crate::line::parse_line;

#[derive(Debug, Clone)]
struct MacroDef {
    formals: Vec<String>,
    body: Vec<String>,
}

/// Expands all macro definitions/invocations in `lines`, returning the
/// flat stream of lines Pass 1 should see. `MACRO`/`MEND` definition lines
/// never appear in the output.
pub fn expand(lines: &[String]) -> Vec<String> {
    let mut macros: HashMap<String, MacroDef> = HashMap::new();
    let mut output = Vec::with_capacity(lines.len());

    let mut i = 0;
    while i < lines.len() {
        let raw = &lines[i];
        let parsed = parse_line(raw);

        match parsed {
            Some(p) if p.mnemonic == "MACRO" => {
                let (name, formals) = macro_signature(&p);
                let mut body = Vec::new();
                i += 1;
                while i < lines.len() {
                    let body_parsed = parse_line(&lines[i]);
                    if matches!(&body_parsed, Some(bp) if bp.mnemonic == "MEND") {
                        i += 1;
                        break;
                    }
                    body.push(lines[i].clone());
                    i += 1;
                }
                macros.insert(name, MacroDef { formals, body });
                continue;
            }
            Some(p) if macros.contains_key(&p.mnemonic) => {
                let def = &macros[&p.mnemonic];
                let actuals: Vec<String> = p
                    .operand
                    .as_deref()
                    .unwrap_or("")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect();

                let mut subs = HashMap::new();
                for (idx, formal) in def.formals.iter().enumerate() {
                    let key = if formal.starts_with('&') {
                        formal.clone()
                    } else {
                        format!("&{}", formal)
                    };
                    let value = actuals.get(idx).cloned().unwrap_or_default();
                    subs.insert(key, value);
                }

                if let Some(label) = &p.label {
                    output.push(format!("{} RESB 0", label));
                }

                for body_line in &def.body {
                    output.push(substitute_line(body_line, &subs));
                }
            }
            _ => output.push(raw.clone()),
        }

        i += 1;
    }

    output
}

/// Recovers the macro's name and declared formal parameters from its
/// `MACRO` definition line, per spec.md §4.2.
fn macro_signature(def_line: &crate::line::ParsedLine) -> (String, Vec<String>) {
    match (&def_line.label, &def_line.operand) {
        (Some(label), operand) => {
            let formals = comma_split(operand.as_deref().unwrap_or(""));
            (label.clone(), formals)
        }
        (None, Some(operand)) => {
            let mut parts = operand.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").to_string();
            let rest = parts.next().unwrap_or("").trim_start();
            (name, comma_split(rest))
        }
        (None, None) => (String::new(), Vec::new()),
    }
}

fn comma_split(s: &str) -> Vec<String> {
    s.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Replaces every `&NAME` token appearing anywhere in `line` with its
/// mapped actual, taking the maximal identifier run after `&` as the
/// token so `&N` never matches inside `&NUM`. Unmatched `&name` tokens
/// are left as literal text (spec.md §7: this is intentionally lenient).
fn substitute_line(line: &str, subs: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(line.len());
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '&' {
            let start = i;
            let mut end = i + 1;
            while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let token: String = chars[start..end].iter().collect();
            match subs.get(&token) {
                Some(value) => result.push_str(value),
                None => result.push_str(&token),
            }
            i = end;
        } else {
            result.push(chars[i]);
            i += 1;
        }
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;

    fn lines(src: &str) -> Vec<String> {
        src.lines().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expands_simple_invocation() {
        let src = lines(
            "RDBUFF MACRO &INDEV,&LENGTH\n\
             \tLDX #0\n\
             \tLDA &INDEV\n\
             \tSTCH &LENGTH\n\
             \tMEND\n\
             FIRST RDBUFF F1,LENGTH\n\
             END FIRST",
        );

        let out = expand(&src);

        assert_eq!(
            out,
            vec![
                "FIRST RESB 0".to_string(),
                "\tLDX #0".to_string(),
                "\tLDA F1".to_string(),
                "\tSTCH LENGTH".to_string(),
                "END FIRST".to_string(),
            ]
        );
    }

    #[test]
    fn unlabeled_invocation_emits_no_synthetic_line() {
        let src = lines(
            "RDBUFF MACRO &INDEV\n\
             \tLDA &INDEV\n\
             \tMEND\n\
             RDBUFF F1",
        );

        let out = expand(&src);
        assert_eq!(out, vec!["\tLDA F1".to_string()]);
    }

    #[test]
    fn missing_actual_substitutes_empty_string() {
        let src = lines(
            "M MACRO &A,&B\n\
             \tLDA &A&B\n\
             \tMEND\n\
             M X",
        );

        let out = expand(&src);
        assert_eq!(out, vec!["\tLDA X".to_string()]);
    }

    #[test]
    fn unknown_ampersand_token_is_left_verbatim() {
        let src = lines(
            "M MACRO &A\n\
             \tLDA &UNDECLARED\n\
             \tMEND\n\
             M X",
        );

        let out = expand(&src);
        assert_eq!(out, vec!["\tLDA &UNDECLARED".to_string()]);
    }

    #[test]
    fn non_macro_lines_pass_through() {
        let src = lines("FIRST STL RETADR\nRETADR RESW 1");
        assert_eq!(expand(&src), src);
    }
}
