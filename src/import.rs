//! Bulk credential import parsing.
//!
//! Admins paste one credential per line, `identifier<sep>secret`, where the
//! separator is the first occurrence of `;`, `:`, `,` or `|`. Blank lines are
//! ignored; malformed lines are counted as skipped and never abort the batch.

/// Accepted field separators, tried by first position in the line.
pub const SEPARATORS: [char; 4] = [';', ':', ',', '|'];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedLine {
    pub identifier: String,
    pub secret: String,
}

#[derive(Clone, Debug, Default)]
pub struct ParseOutcome {
    pub records: Vec<ParsedLine>,
    pub skipped: usize,
}

/// Split a blob of newline-delimited credentials into records.
pub fn parse_bulk(input: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match split_record(line) {
            Some(rec) => outcome.records.push(rec),
            None => outcome.skipped += 1,
        }
    }
    outcome
}

/// Split on the earliest separator occurrence; both halves must be non-empty.
fn split_record(line: &str) -> Option<ParsedLine> {
    let pos = line
        .char_indices()
        .find(|(_, c)| SEPARATORS.contains(c))
        .map(|(i, _)| i)?;
    let (identifier, rest) = line.split_at(pos);
    let secret = &rest[1..];
    let identifier = identifier.trim();
    let secret = secret.trim();
    if identifier.is_empty() || secret.is_empty() {
        return None;
    }
    Some(ParsedLine {
        identifier: identifier.to_string(),
        secret: secret.to_string(),
    })
}
