//! Currency parsing
//!
//! Amounts arrive as `€1,234.56`, `1.234,56 EUR`, `12,5` or plain numbers.
//! All of them become a fixed two-decimal string such as `"1234.56"`.
//! The arithmetic is done on digit strings so no binary float rounding leaks
//! into stored amounts.

use serde_json::Number;

/// Parse a money string into a two-decimal numeric string.
///
/// The last of `.`/`,` is the decimal separator when both occur. When only
/// one kind occurs, `.` and `,` follow the same rule: repeated, it groups
/// thousands; once, it groups thousands only in the `1.234` / `1,234` shape
/// (one to three leading digits, not all zero, then exactly three digits)
/// and is decimal otherwise. A `-` before the first digit or surrounding
/// parentheses make the amount negative.
pub fn parse_money(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let first_digit = trimmed.find(|c: char| c.is_ascii_digit())?;
    let negative = trimmed[..first_digit].contains('-')
        || (trimmed.starts_with('(') && trimmed.ends_with(')'));

    let cleaned: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let decimal_at = decimal_separator_position(&cleaned);
    let (int_part, frac_part) = match decimal_at {
        Some(pos) => (&cleaned[..pos], &cleaned[pos + 1..]),
        None => (cleaned.as_str(), ""),
    };

    let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
    let frac_digits: String = frac_part.chars().filter(char::is_ascii_digit).collect();

    Some(to_fixed_two(&int_digits, &frac_digits, negative))
}

/// Format a JSON number as a two-decimal money string
pub fn format_number(n: &Number) -> Option<String> {
    if let Some(i) = n.as_i64() {
        return Some(format!("{i}.00"));
    }
    if let Some(u) = n.as_u64() {
        return Some(format!("{u}.00"));
    }
    let f = n.as_f64()?;
    if !f.is_finite() {
        return None;
    }
    let text = f.abs().to_string();
    let (int_digits, frac_digits) = text.split_once('.').unwrap_or((text.as_str(), ""));
    Some(to_fixed_two(int_digits, frac_digits, f < 0.0))
}

fn decimal_separator_position(cleaned: &str) -> Option<usize> {
    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => Some(dot.max(comma)),
        (Some(pos), None) | (None, Some(pos)) => {
            let separator = &cleaned[pos..=pos];
            let once = cleaned.matches(separator).count() == 1;
            (once && !groups_thousands(&cleaned[..pos], &cleaned[pos + 1..])).then_some(pos)
        },
        (None, None) => None,
    }
}

fn groups_thousands(before: &str, after: &str) -> bool {
    after.len() == 3 && (1..=3).contains(&before.len()) && before.bytes().any(|b| b != b'0')
}

fn to_fixed_two(int_digits: &str, frac_digits: &str, negative: bool) -> String {
    let int_digits = int_digits.trim_start_matches('0');
    let mut digits: Vec<u8> = int_digits.bytes().collect();
    let mut frac = frac_digits.bytes();
    for _ in 0..2 {
        digits.push(frac.next().unwrap_or(b'0'));
    }

    // round half up on the third fractional digit
    if frac.next().is_some_and(|d| d >= b'5') {
        let mut carry = true;
        for d in digits.iter_mut().rev() {
            if *d == b'9' {
                *d = b'0';
            } else {
                *d += 1;
                carry = false;
                break;
            }
        }
        if carry {
            digits.insert(0, b'1');
        }
    }

    let split = digits.len() - 2;
    let int_str = std::str::from_utf8(&digits[..split]).unwrap_or("0");
    let frac_str = std::str::from_utf8(&digits[split..]).unwrap_or("00");
    let int_str = if int_str.is_empty() { "0" } else { int_str };

    let is_zero = int_str == "0" && frac_str == "00";
    let sign = if negative && !is_zero { "-" } else { "" };
    format!("{sign}{int_str}.{frac_str}")
}
