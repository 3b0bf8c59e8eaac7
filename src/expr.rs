//! Numeric tokens and register-relative expressions
//!
//! Command values are hex first. A value that is not plain hex is handed to a
//! [`SymbolResolver`], which for the controller means a sum of hex literals and
//! `@register` terms evaluated against the current register snapshot.

use crate::debug::types::GuestRegisters;

/// Parse a hex token (`1c0`, `0x1c0`, `fffff801`12345678`)
pub fn parse_hex_u64(token: &str) -> Option<u64> {
    let digits = normalize_hex(token)?;
    if digits.len() > 16 {
        return None;
    }
    u64::from_str_radix(&digits, 16).ok()
}

/// Parse a hex token that must fit in 32 bits
pub fn parse_hex_u32(token: &str) -> Option<u32> {
    let digits = normalize_hex(token)?;
    if digits.len() > 8 {
        return None;
    }
    u32::from_str_radix(&digits, 16).ok()
}

fn normalize_hex(token: &str) -> Option<String> {
    let token = token.trim();
    let token = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    let digits: String = token.chars().filter(|&c| c != '`').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(digits)
}

/// Resolves a symbolic expression to an address or value
pub trait SymbolResolver {
    fn resolve(&self, expression: &str) -> Option<u64>;
}

/// Resolver that knows no symbols at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn resolve(&self, _expression: &str) -> Option<u64> {
        None
    }
}

/// Evaluates `term (+|-) term ...` where a term is a hex literal or `@reg`
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterExpression<'a> {
    registers: Option<&'a GuestRegisters>,
}

impl<'a> RegisterExpression<'a> {
    /// Evaluate against a register snapshot
    pub fn new(registers: &'a GuestRegisters) -> Self {
        Self {
            registers: Some(registers),
        }
    }

    /// Literal-only evaluation; every `@reg` term fails
    pub fn without_registers() -> Self {
        Self { registers: None }
    }

    fn term(&self, term: &str) -> Option<u64> {
        match term.strip_prefix('@') {
            Some(name) => self.registers?.get(name),
            None => parse_hex_u64(term),
        }
    }
}

impl SymbolResolver for RegisterExpression<'_> {
    fn resolve(&self, expression: &str) -> Option<u64> {
        let expression: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        if expression.is_empty() {
            return None;
        }

        let mut total: u64 = 0;
        let mut negate = false;
        let mut start = 0;
        let bytes = expression.as_bytes();

        for end in 0..=bytes.len() {
            let at_operator = end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-');
            if end < bytes.len() && !at_operator {
                continue;
            }

            let value = self.term(&expression[start..end])?;
            total = if negate {
                total.wrapping_sub(value)
            } else {
                total.wrapping_add(value)
            };

            if at_operator {
                negate = bytes[end] == b'-';
                start = end + 1;
            }
        }

        Some(total)
    }
}
