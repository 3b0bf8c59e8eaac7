//! Clause scanner
//!
//! Keywords come in two shapes: value keywords consume exactly one following
//! token, block keywords consume a `{ ... }` span with balanced braces that may
//! stretch over many tokens. Everything else is a bare word.

use super::ParsingErrorCause;

/// Keywords followed by exactly one value token
pub const VALUE_KEYWORDS: &[&str] = &["pid", "core", "imm", "sc", "buffer"];

/// Keywords followed by a bracketed block
pub const BLOCK_KEYWORDS: &[&str] = &["script", "condition", "code"];

/// One grouped piece of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause<'a> {
    /// A bare token (mode flag, action flag, numeric value, or garbage)
    Word(&'a str),
    /// `keyword value`; `value` is `None` when the keyword is the last token
    Value {
        keyword: &'static str,
        value: Option<&'a str>,
    },
    /// `keyword { body }`, body without the outer braces
    Block { keyword: &'static str, body: String },
}

fn lookup(table: &[&'static str], token: &str) -> Option<&'static str> {
    table
        .iter()
        .copied()
        .find(|keyword| keyword.eq_ignore_ascii_case(token))
}

/// Group `tokens` into clauses. The first token is the command name and is skipped.
pub fn scan<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<Clause<'_>>, ParsingErrorCause> {
    let mut clauses = Vec::new();
    let mut index = 1;

    while index < tokens.len() {
        let token = tokens[index].as_ref();

        if let Some(keyword) = lookup(VALUE_KEYWORDS, token) {
            let value = tokens.get(index + 1).map(|t| t.as_ref());
            clauses.push(Clause::Value { keyword, value });
            index += 1 + usize::from(value.is_some());
        } else if let Some(keyword) = lookup(BLOCK_KEYWORDS, token) {
            let (body, consumed) = extract_block(keyword, &tokens[index + 1..])?;
            clauses.push(Clause::Block { keyword, body });
            index += 1 + consumed;
        } else {
            clauses.push(Clause::Word(token));
            index += 1;
        }
    }

    Ok(clauses)
}

/// Decode a hex block body (`90 90 c3`) into bytes
pub fn decode_hex_block(keyword: &str, body: &str) -> Result<Vec<u8>, ParsingErrorCause> {
    let digits: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(digits).map_err(|_| ParsingErrorCause::MalformedBracketBlock(keyword.to_string()))
}

/// Extract a `{ ... }` span from the start of `rest`, returning the body and
/// the number of tokens it covered.
fn extract_block<S: AsRef<str>>(
    keyword: &'static str,
    rest: &[S],
) -> Result<(String, usize), ParsingErrorCause> {
    let malformed = || ParsingErrorCause::MalformedBracketBlock(keyword.to_string());

    match rest.first() {
        Some(first) if first.as_ref().starts_with('{') => {}
        _ => return Err(malformed()),
    }

    let mut text = String::new();
    let mut depth = 0usize;

    for (consumed, token) in rest.iter().enumerate() {
        let token = token.as_ref();
        if consumed > 0 {
            text.push(' ');
        }

        for (offset, ch) in token.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }

            if depth == 0 {
                // The closing brace has to end its token
                if offset + 1 != token.len() {
                    return Err(malformed());
                }
                text.push_str(token);
                let body = text[1..text.len() - 1].trim().to_string();
                if body.is_empty() {
                    return Err(malformed());
                }
                return Ok((body, consumed + 1));
            }
        }

        text.push_str(token);
    }

    Err(malformed())
}
