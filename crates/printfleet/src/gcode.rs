use alloc::format;

use crate::error::{Error, ErrorKind, Result};

/// Validates a single machine-control line.
///
/// Anything after `;` is a comment and ignored. The first token must be an
/// instruction (`G` or `M` followed by digits). Every other token must be an
/// upper-case parameter letter followed by an optionally signed decimal
/// number, such as `X-10.5`.
///
/// # Errors
///
/// Returns an [`ErrorKind::InvalidGcode`] error describing the first
/// offending token.
pub fn validate(line: &str) -> Result<()> {
    let code = line.split(';').next().unwrap_or_default().trim();
    let mut tokens = code.split_whitespace();

    let Some(instruction) = tokens.next() else {
        return Err(Error::new(
            ErrorKind::InvalidGcode,
            format!("`{line}` contains no instruction."),
        ));
    };

    if !is_instruction(instruction) {
        return Err(Error::new(
            ErrorKind::InvalidGcode,
            format!("`{instruction}` in `{line}` is not a valid instruction."),
        ));
    }

    if let Some(parameter) = tokens.find(|token| !is_parameter(token)) {
        return Err(Error::new(
            ErrorKind::InvalidGcode,
            format!("`{parameter}` in `{line}` is not a valid parameter."),
        ));
    }

    Ok(())
}

// `G` or `M` followed by at least one digit. Trailing characters are allowed.
fn is_instruction(token: &str) -> bool {
    let mut bytes = token.bytes();
    matches!(bytes.next(), Some(b'G' | b'M')) && bytes.next().is_some_and(|b| b.is_ascii_digit())
}

fn is_parameter(token: &str) -> bool {
    let Some((letter, value)) = token.split_at_checked(1) else {
        return false;
    };

    if !letter.bytes().all(|b| b.is_ascii_uppercase()) {
        return false;
    }

    let value = value.strip_prefix('-').unwrap_or(value);
    match value.split_once('.') {
        Some((integer, fraction)) => is_digits(integer) && is_digits(fraction),
        None => is_digits(value),
    }
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::validate;
    use crate::error::ErrorKind;

    #[test]
    fn valid_lines() {
        for line in [
            "G28",
            "M104 S200",
            "G1 X10 Y-5.25 F3000",
            "  M140 S60   ; heat the bed",
            "G0 Z0.4\n",
            "M106 P1 S255",
        ] {
            assert!(validate(line).is_ok(), "`{line}` should be valid");
        }
    }

    #[test]
    fn invalid_lines() {
        for line in [
            "",
            "; only a comment",
            "X10",
            "g1 X10",
            "G X10",
            "G1 x10",
            "G1 X",
            "G1 X1.",
            "G1 X.5",
            "G1 XY10",
            "M104 S200 hello",
            "G1 X--1",
        ] {
            let error = validate(line).unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidGcode, "`{line}`");
        }
    }
}
