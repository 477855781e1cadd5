//! Reference grammar.
//!
//! Parses the reference shapes that appear in stored formulas and compiled
//! dependency inputs:
//!
//! ```text
//! A1              bare address (current sheet)
//! Sheet2!B3       same-file, sheet-qualified
//! 'My Sheet'!B3   same-file, quoted sheet (doubled '' escapes a quote)
//! [1]Sheet2!B3    external placeholder, index into the workbook's link table
//! '[ext.xlsx]Sheet2'!B3            external, file known
//! '/dir/[ext.xlsx]Sheet2'!B3       external with directory
//! ```
//!
//! Everything here is a structured character scanner over `Peekable<Chars>`,
//! not pattern-matching on string shapes, so malformed references fail with a
//! typed error instead of silently mis-parsing.

use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Chars;

use crate::address;
use crate::identity::CellIdentity;

/// One parsed reference, not yet resolved against a file context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRef {
    /// Reference into the same workbook file.
    Local { sheet: String, addr: String },
    /// Reference into another workbook file. `dir` may be empty (file is then
    /// resolved against the trace's working directory).
    External {
        dir: String,
        file: String,
        sheet: String,
        addr: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefParseError {
    Empty,
    /// The address part is not a valid cell or range address.
    BadAddress(String),
    UnterminatedQuote(String),
    /// No recognized qualifier!address shape.
    Unrecognized(String),
}

impl std::fmt::Display for RefParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty reference"),
            Self::BadAddress(a) => write!(f, "invalid cell address '{a}'"),
            Self::UnterminatedQuote(r) => write!(f, "unterminated quote in reference '{r}'"),
            Self::Unrecognized(r) => write!(f, "unrecognized reference '{r}'"),
        }
    }
}

impl std::error::Error for RefParseError {}

/// Parse a qualified reference string (`qualifier!address`).
///
/// Bare addresses are rejected here: compiled inputs and dynamic-reference
/// results are always qualified, and a bare address carries no sheet context
/// to resolve against.
pub fn parse_reference(input: &str) -> Result<RawRef, RefParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(RefParseError::Empty);
    }

    // The address part never contains '!', so the last '!' splits qualifier
    // from address even when a quoted sheet name contains one.
    let bang = input
        .rfind('!')
        .ok_or_else(|| RefParseError::Unrecognized(input.to_string()))?;
    let (qualifier, addr) = (&input[..bang], &input[bang + 1..]);

    let addr = addr.trim();
    if !address::is_address(addr) {
        return Err(RefParseError::BadAddress(addr.to_string()));
    }
    let addr = address::normalize(addr);

    let qualifier = unquote(qualifier.trim())
        .ok_or_else(|| RefParseError::UnterminatedQuote(input.to_string()))?;
    if qualifier.is_empty() {
        return Err(RefParseError::Unrecognized(input.to_string()));
    }

    match split_bracketed(&qualifier) {
        Some((dir, file, sheet)) => Ok(RawRef::External {
            dir,
            file,
            sheet,
            addr,
        }),
        None => Ok(RawRef::Local {
            sheet: qualifier,
            addr,
        }),
    }
}

/// Resolve a parsed reference to a concrete identity.
///
/// Local references stay in `current_file`; external references resolve their
/// directory (possibly empty) against `working_dir`.
pub fn resolve_reference(
    raw: &RawRef,
    current_file: &Path,
    working_dir: &Path,
) -> CellIdentity {
    match raw {
        RawRef::Local { sheet, addr } => CellIdentity::new(current_file, sheet.clone(), addr.clone()),
        RawRef::External {
            dir,
            file,
            sheet,
            addr,
        } => {
            let dir = dir.trim_end_matches(['/', '\\']);
            let mut path = PathBuf::from(working_dir);
            if !dir.is_empty() {
                path = path.join(dir);
            }
            path = path.join(file);
            CellIdentity::new(path, sheet.clone(), addr.clone())
        }
    }
}

/// Parse-and-resolve in one step.
pub fn resolve_reference_str(
    input: &str,
    current_file: &Path,
    working_dir: &Path,
) -> Result<CellIdentity, RefParseError> {
    let raw = parse_reference(input)?;
    Ok(resolve_reference(&raw, current_file, working_dir))
}

/// Strip one level of surrounding single quotes, unescaping doubled `''`.
/// Returns `None` for an unterminated quote. Unquoted input passes through.
fn unquote(s: &str) -> Option<String> {
    if let Some(rest) = s.strip_prefix('\'') {
        let inner = rest.strip_suffix('\'')?;
        Some(inner.replace("''", "'"))
    } else {
        Some(s.to_string())
    }
}

/// Split `dir[file]sheet` into its parts; `None` when no brackets present.
fn split_bracketed(qualifier: &str) -> Option<(String, String, String)> {
    let open = qualifier.find('[')?;
    let close = qualifier[open..].find(']')? + open;
    let dir = qualifier[..open].to_string();
    let file = qualifier[open + 1..close].to_string();
    let sheet = qualifier[close + 1..].to_string();
    Some((dir, file, sheet))
}

// ============================================================================
// Formula scanning: compiled-input extraction
// ============================================================================

/// Extract the references a stored formula reads, as normalized raw strings:
/// `Sheet!ADDR` for same-file references and `'[file]Sheet'!ADDR` (with an
/// optional leading dir inside the quotes) for cross-file ones.
///
/// `links` is the workbook's ordered external-link table; `[N]` placeholders
/// resolve to its N-th entry. Placeholders with no table entry are skipped.
pub fn scan_references(formula: &str, current_sheet: &str, links: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = formula.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '"' => skip_string_literal(&mut chars),
            '\'' => {
                if let Some((qualifier, addr)) = read_quoted_reference(&mut chars) {
                    push_qualified(&mut out, &qualifier, &addr, links);
                }
            }
            '[' => {
                if let Some((qualifier, addr)) = read_bracket_reference(&mut chars) {
                    push_qualified(&mut out, &qualifier, &addr, links);
                }
            }
            c if c.is_ascii_alphabetic() || c == '$' || c == '_' => {
                scan_ident(&mut chars, current_sheet, links, &mut out);
            }
            _ => {
                chars.next();
            }
        }
    }

    out
}

fn push_qualified(out: &mut Vec<String>, qualifier: &str, addr: &str, links: &[String]) {
    match split_bracketed(qualifier) {
        Some((dir, file, sheet)) => {
            // Numeric placeholder: look the file up in the link table.
            if !file.is_empty() && file.chars().all(|c| c.is_ascii_digit()) {
                let index: usize = match file.parse() {
                    Ok(n) => n,
                    Err(_) => return,
                };
                match index.checked_sub(1).and_then(|i| links.get(i)) {
                    Some(linked) => out.push(format!("'[{linked}]{sheet}'!{addr}")),
                    None => {}
                }
            } else if dir.is_empty() {
                out.push(format!("'[{file}]{sheet}'!{addr}"));
            } else {
                out.push(format!("'{dir}[{file}]{sheet}'!{addr}"));
            }
        }
        None => out.push(format!("{qualifier}!{addr}")),
    }
}

/// `'qualifier'!ADDR`. Consumes the whole span, or just the opening quote
/// when the span is not a reference.
fn read_quoted_reference(chars: &mut Peekable<Chars<'_>>) -> Option<(String, String)> {
    chars.next(); // opening quote
    let mut qualifier = String::new();
    loop {
        match chars.next() {
            Some('\'') => {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    qualifier.push('\'');
                } else {
                    break;
                }
            }
            Some(c) => qualifier.push(c),
            None => return None,
        }
    }
    if chars.peek() != Some(&'!') {
        return None;
    }
    chars.next();
    let addr = read_address(chars)?;
    Some((qualifier, addr))
}

/// `[file-or-index]sheet!ADDR` without quotes.
fn read_bracket_reference(chars: &mut Peekable<Chars<'_>>) -> Option<(String, String)> {
    chars.next(); // '['
    let mut qualifier = String::from("[");
    loop {
        match chars.next() {
            Some(']') => {
                qualifier.push(']');
                break;
            }
            Some(c) => qualifier.push(c),
            None => return None,
        }
    }
    while let Some(&c) = chars.peek() {
        if c == '!' {
            break;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == ' ' {
            qualifier.push(c);
            chars.next();
        } else {
            return None;
        }
    }
    if chars.peek() != Some(&'!') {
        return None;
    }
    chars.next();
    let addr = read_address(chars)?;
    Some((qualifier, addr))
}

/// Identifier position: sheet qualifier, cell address, or function name.
fn scan_ident(
    chars: &mut Peekable<Chars<'_>>,
    current_sheet: &str,
    links: &[String],
    out: &mut Vec<String>,
) {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }

    match chars.peek() {
        Some('!') => {
            chars.next();
            if let Some(addr) = read_address(chars) {
                push_qualified(out, &ident, &addr, links);
            }
        }
        // Function call, not a reference (guards names like LOG10).
        Some('(') => {}
        _ => {
            let bare = address::normalize(&ident);
            if address::parse_address(&bare).is_some() {
                // Possible range tail
                if chars.peek() == Some(&':') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if let Some(end) = read_cell_token(&mut lookahead) {
                        *chars = lookahead;
                        out.push(format!("{current_sheet}!{bare}:{end}"));
                        return;
                    }
                }
                out.push(format!("{current_sheet}!{bare}"));
            }
        }
    }
}

/// Cell address, optionally a range (`A1` or `A1:B2`), normalized.
fn read_address(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let start = read_cell_token(chars)?;
    if chars.peek() == Some(&':') {
        let mut lookahead = chars.clone();
        lookahead.next();
        if let Some(end) = read_cell_token(&mut lookahead) {
            *chars = lookahead;
            return Some(format!("{start}:{end}"));
        }
    }
    Some(start)
}

/// One `$A$1`-shaped token, normalized (uppercase, `$` stripped).
fn read_cell_token(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut token = String::new();
    if chars.peek() == Some(&'$') {
        chars.next();
    }
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphabetic() {
            token.push(c.to_ascii_uppercase());
            chars.next();
        } else {
            break;
        }
    }
    if chars.peek() == Some(&'$') {
        chars.next();
    }
    let letters_len = token.len();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            token.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if letters_len == 0 || letters_len > 3 || token.len() == letters_len {
        return None;
    }
    address::parse_address(&token).map(|_| token)
}

fn skip_string_literal(chars: &mut Peekable<Chars<'_>>) {
    chars.next(); // opening quote
    while let Some(c) = chars.next() {
        if c == '"' {
            // Doubled "" is an escaped quote inside the literal.
            if chars.peek() == Some(&'"') {
                chars.next();
            } else {
                break;
            }
        }
    }
}

// ============================================================================
// Placeholder substitution: display-text reconstruction
// ============================================================================

/// Replace `[N]Sheet!Cell` placeholders (quoted or bare) in raw formula text
/// with their fully-qualified `'dir[file]sheet'!cell` display form, resolving
/// `N` through the link table against `working_dir`. Unknown indices are left
/// untouched; string literals are never rewritten.
pub fn substitute_placeholders(formula: &str, links: &[String], working_dir: &Path) -> String {
    let sep = std::path::MAIN_SEPARATOR;
    let mut out = String::with_capacity(formula.len());
    let mut chars = formula.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '"' => copy_string_literal(&mut chars, &mut out),
            '\'' => {
                let mut lookahead = chars.clone();
                lookahead.next();
                if lookahead.peek() == Some(&'[') {
                    if let Some(rendered) =
                        read_quoted_placeholder(&mut chars, links, working_dir, sep)
                    {
                        out.push_str(&rendered);
                        continue;
                    }
                }
                // Not a placeholder: copy the quoted span verbatim.
                copy_quoted_span(&mut chars, &mut out);
            }
            '[' => {
                if let Some(rendered) = read_bare_placeholder(&mut chars, links, working_dir, sep) {
                    out.push_str(&rendered);
                } else {
                    out.push('[');
                    chars.next();
                }
            }
            _ => {
                out.push(c);
                chars.next();
            }
        }
    }

    out
}

/// `[N]` digits between brackets; restores nothing on failure (caller keeps
/// the original characters).
fn read_index(chars: &mut Peekable<Chars<'_>>) -> Option<usize> {
    let mut lookahead = chars.clone();
    lookahead.next(); // '['
    let mut digits = String::new();
    while let Some(&c) = lookahead.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            lookahead.next();
        } else {
            break;
        }
    }
    if digits.is_empty() || lookahead.peek() != Some(&']') {
        return None;
    }
    lookahead.next(); // ']'
    *chars = lookahead;
    digits.parse().ok()
}

/// Bare `[N]Sheet!A1` (or `[N]Sheet` without an address part).
fn read_bare_placeholder(
    chars: &mut Peekable<Chars<'_>>,
    links: &[String],
    working_dir: &Path,
    sep: char,
) -> Option<String> {
    let mut lookahead = chars.clone();
    let index = read_index(&mut lookahead)?;
    let file = links.get(index.checked_sub(1)?)?;

    let mut sheet = String::new();
    while let Some(&c) = lookahead.peek() {
        if c == '!' || is_placeholder_boundary(c) {
            break;
        }
        sheet.push(c);
        lookahead.next();
    }
    if sheet.is_empty() {
        return None;
    }

    let mut cell = String::new();
    if lookahead.peek() == Some(&'!') {
        lookahead.next();
        while let Some(&c) = lookahead.peek() {
            if c.is_ascii_alphanumeric() || c == '$' || c == ':' {
                cell.push(c);
                lookahead.next();
            } else {
                break;
            }
        }
    }

    *chars = lookahead;
    let dir = working_dir.display();
    if cell.is_empty() {
        Some(format!("'{dir}{sep}[{file}]{sheet}'"))
    } else {
        Some(format!("'{dir}{sep}[{file}]{sheet}'!{cell}"))
    }
}

/// Quoted `'[N]Sheet name'!A1`.
fn read_quoted_placeholder(
    chars: &mut Peekable<Chars<'_>>,
    links: &[String],
    working_dir: &Path,
    sep: char,
) -> Option<String> {
    let mut lookahead = chars.clone();
    lookahead.next(); // opening quote
    let index = read_index(&mut lookahead)?;
    let file = links.get(index.checked_sub(1)?)?;

    let mut sheet = String::new();
    loop {
        match lookahead.next() {
            Some('\'') => {
                if lookahead.peek() == Some(&'\'') {
                    lookahead.next();
                    sheet.push('\'');
                } else {
                    break;
                }
            }
            Some(c) => sheet.push(c),
            None => return None,
        }
    }
    if lookahead.peek() != Some(&'!') {
        return None;
    }
    lookahead.next();
    let mut cell = String::new();
    while let Some(&c) = lookahead.peek() {
        if c.is_ascii_alphanumeric() || c == '$' || c == ':' {
            cell.push(c);
            lookahead.next();
        } else {
            break;
        }
    }
    if cell.is_empty() {
        return None;
    }

    *chars = lookahead;
    let dir = working_dir.display();
    Some(format!("'{dir}{sep}[{file}]{sheet}'!{cell}"))
}

fn is_placeholder_boundary(c: char) -> bool {
    matches!(
        c,
        ',' | ')' | '(' | '*' | '+' | '-' | '/' | '^' | '=' | '<' | '>' | ':' | '&' | '\''
    ) || c.is_whitespace()
}

fn copy_string_literal(chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    out.push('"');
    chars.next();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '"' {
            if chars.peek() == Some(&'"') {
                out.push('"');
                chars.next();
            } else {
                break;
            }
        }
    }
}

fn copy_quoted_span(chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    out.push('\'');
    chars.next();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '\'' {
            if chars.peek() == Some(&'\'') {
                out.push('\'');
                chars.next();
            } else {
                break;
            }
        }
    }
}

// ============================================================================
// Dynamic-reference (INDIRECT) argument handling
// ============================================================================

/// One segment of an INDIRECT argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndirectSegment {
    /// A double-quoted string literal (quotes stripped).
    Literal(String),
    /// A sub-expression between literals/`&`, to be evaluated as a cell
    /// reference.
    Expr(String),
}

/// The argument text of the first INDIRECT call in `formula`, with balanced
/// parentheses (string literals do not count toward nesting).
pub fn indirect_argument(formula: &str) -> Option<String> {
    let upper = formula.to_ascii_uppercase();
    let start = upper.find("INDIRECT")?;
    let rest = &formula[start + "INDIRECT".len()..];
    let mut chars = rest.chars();
    match chars.next() {
        Some('(') => {}
        _ => return None,
    }

    let mut depth = 1usize;
    let mut arg = String::new();
    let mut in_string = false;
    for c in chars {
        if in_string {
            arg.push(c);
            if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                arg.push(c);
            }
            '(' => {
                depth += 1;
                arg.push(c);
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(arg);
                }
                arg.push(c);
            }
            _ => arg.push(c),
        }
    }
    None
}

/// Split an INDIRECT argument on string-literal boundaries and the `&`
/// concatenation operator, preserving source order.
pub fn split_indirect(arg: &str) -> Vec<IndirectSegment> {
    let mut segments = Vec::new();
    let mut expr = String::new();
    let mut chars = arg.chars().peekable();

    let flush = |expr: &mut String, segments: &mut Vec<IndirectSegment>| {
        let trimmed = expr.trim();
        if !trimmed.is_empty() {
            segments.push(IndirectSegment::Expr(trimmed.to_string()));
        }
        expr.clear();
    };

    while let Some(&c) = chars.peek() {
        match c {
            '"' => {
                flush(&mut expr, &mut segments);
                chars.next();
                let mut lit = String::new();
                loop {
                    match chars.next() {
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                lit.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(c) => lit.push(c),
                        None => break,
                    }
                }
                segments.push(IndirectSegment::Literal(lit));
            }
            '&' => {
                flush(&mut expr, &mut segments);
                chars.next();
            }
            _ => {
                expr.push(c);
                chars.next();
            }
        }
    }
    flush(&mut expr, &mut segments);

    segments
}
