//! CSV field escaping for protocol records.
//!
//! The escaping rules are the load-bearing part of the wire contract:
//!
//! - fields are separated by `,`;
//! - a field containing a comma, double quote, CR, or LF is wrapped in
//!   double quotes, with embedded quotes doubled;
//! - an unquoted empty field is NULL;
//! - a quoted empty field (`""`) is the empty string.
//!
//! A quoted field may span physical lines (payload events can carry
//! multi-line SQL); [`split_record`] reports [`SplitOutcome::NeedMore`]
//! so the reader can append the next line and retry.

use sync_model::event::Cell;

/// Result of tokenizing one (possibly partial) record.
#[derive(Debug, PartialEq)]
pub enum SplitOutcome {
    /// All fields parsed.
    Complete(Vec<Cell>),
    /// A quoted field is still open at end of input; the caller should
    /// append the next physical line (with its newline restored) and
    /// tokenize again.
    NeedMore,
}

/// Tokenize one record into cells.
pub fn split_record(record: &str) -> SplitOutcome {
    let mut cells: Vec<Cell> = Vec::new();
    let mut chars = record.chars().peekable();

    loop {
        match chars.peek() {
            None => {
                // trailing separator or empty record yields a final NULL
                cells.push(None);
                return SplitOutcome::Complete(cells);
            }
            Some('"') => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        None => return SplitOutcome::NeedMore,
                        Some('"') => {
                            if chars.peek() == Some(&'"') {
                                chars.next();
                                value.push('"');
                            } else {
                                break;
                            }
                        }
                        Some(c) => value.push(c),
                    }
                }
                cells.push(Some(value));
                // after the closing quote only a separator or end is valid;
                // anything else is folded into the field to stay tolerant of
                // hand-edited streams
                match chars.next() {
                    None => return SplitOutcome::Complete(cells),
                    Some(',') => continue,
                    Some(stray) => {
                        if let Some(Some(value)) = cells.last_mut() {
                            value.push(stray);
                            while let Some(&c) = chars.peek() {
                                if c == ',' {
                                    break;
                                }
                                value.push(c);
                                chars.next();
                            }
                        }
                        match chars.next() {
                            None => return SplitOutcome::Complete(cells),
                            Some(_) => continue,
                        }
                    }
                }
            }
            Some(_) => {
                let mut value = String::new();
                let mut ended = false;
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        chars.next();
                        ended = true;
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                cells.push(if value.is_empty() { None } else { Some(value) });
                if !ended {
                    return SplitOutcome::Complete(cells);
                }
            }
        }
    }
}

/// Escape one cell into its wire form.
pub fn escape(cell: &Cell) -> String {
    match cell {
        None => String::new(),
        Some(value) => {
            if value.is_empty() {
                // quoted empty keeps the empty string distinct from NULL
                "\"\"".to_string()
            } else if value.contains(['"', ',', '\r', '\n']) {
                let mut escaped = String::with_capacity(value.len() + 2);
                escaped.push('"');
                for c in value.chars() {
                    if c == '"' {
                        escaped.push('"');
                    }
                    escaped.push(c);
                }
                escaped.push('"');
                escaped
            } else {
                value.clone()
            }
        }
    }
}

/// Join a directive keyword and its cells into one wire record
/// (without the trailing newline).
pub fn join_record(directive: &str, cells: &[Cell]) -> String {
    let mut record = String::from(directive);
    for cell in cells {
        record.push(',');
        record.push_str(&escape(cell));
    }
    record
}
