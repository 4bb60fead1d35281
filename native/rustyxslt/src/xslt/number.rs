//! Number formatting for `xsl:number` and `format-number()`

use crate::xpath::value::number_to_string;

/// Format a list of positive integers with an `xsl:number` format string
pub fn format_number_list(numbers: &[u64], format: &str, grouping: Option<(&str, usize)>) -> String {
    let (prefix, tokens, suffix) = parse_format(format);
    let mut out = String::from(prefix);

    for (i, &n) in numbers.iter().enumerate() {
        let (separator, token) = match tokens.get(i) {
            Some(t) => *t,
            None => match tokens.last() {
                Some(&(sep, tok)) if tokens.len() > 1 => (sep, tok),
                Some(&(_, tok)) => (".", tok),
                None => (".", "1"),
            },
        };
        if i > 0 {
            out.push_str(if separator.is_empty() { "." } else { separator });
        }
        out.push_str(&format_token(n, token, grouping));
    }

    out.push_str(suffix);
    out
}

/// Split a format into prefix, (separator, token) pairs and suffix
fn parse_format(format: &str) -> (&str, Vec<(&str, &str)>, &str) {
    let mut tokens = Vec::new();
    let mut prefix = "";
    let mut pending_sep_start = 0;
    let mut chars = format.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_alphanumeric() {
            let separator = &format[pending_sep_start..start];
            let mut end = start;
            while let Some(&(i, c)) = chars.peek() {
                if !c.is_alphanumeric() {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            if tokens.is_empty() {
                prefix = separator;
                tokens.push(("", &format[start..end]));
            } else {
                tokens.push((separator, &format[start..end]));
            }
            pending_sep_start = end;
        } else {
            chars.next();
        }
    }

    if tokens.is_empty() {
        return (format, Vec::new(), "");
    }
    (prefix, tokens, &format[pending_sep_start..])
}

fn format_token(n: u64, token: &str, grouping: Option<(&str, usize)>) -> String {
    match token {
        "a" => alphabetic(n, b'a'),
        "A" => alphabetic(n, b'A'),
        "i" => roman(n).to_ascii_lowercase(),
        "I" => roman(n),
        _ => {
            let width = if token.bytes().all(|b| b.is_ascii_digit()) { token.len() } else { 1 };
            let digits = format!("{:0width$}", n, width = width);
            match grouping {
                Some((sep, size)) if size > 0 => group_digits(&digits, sep, size),
                _ => digits,
            }
        }
    }
}

fn alphabetic(mut n: u64, base: u8) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push((base + (n % 26) as u8) as char);
        n /= 26;
    }
    letters.iter().rev().collect()
}

fn roman(n: u64) -> String {
    if n == 0 || n > 3999 {
        return n.to_string();
    }
    const TABLE: [(u64, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut n = n;
    let mut out = String::new();
    for &(value, numeral) in &TABLE {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

fn group_digits(digits: &str, separator: &str, size: usize) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / size * separator.len());
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % size == 0 {
            out.push_str(separator);
        }
        out.push(c);
    }
    out
}

/// `format-number()` with the default decimal format
pub fn format_decimal(value: f64, pattern: &str) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }

    let (positive, negative) = match pattern.split_once(';') {
        Some((p, n)) => (p, Some(n)),
        None => (pattern, None),
    };
    let positive = SubPattern::parse(positive);
    let negative_part = negative.map(SubPattern::parse);

    let is_negative = value < 0.0 || (value == 0.0 && value.is_sign_negative() && negative_part.is_some());
    let (prefix, suffix) = match (&negative_part, is_negative) {
        (Some(neg), true) => (neg.prefix.clone(), neg.suffix.clone()),
        (None, true) => (format!("-{}", positive.prefix), positive.suffix.clone()),
        _ => (positive.prefix.clone(), positive.suffix.clone()),
    };

    let magnitude = value.abs() * positive.multiplier;
    let body = if magnitude.is_infinite() {
        "Infinity".to_string()
    } else {
        positive.format_magnitude(magnitude)
    };
    format!("{}{}{}", prefix, body, suffix)
}

struct SubPattern {
    prefix: String,
    suffix: String,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
    grouping: usize,
    multiplier: f64,
}

impl SubPattern {
    fn parse(pattern: &str) -> Self {
        let is_number_char = |c: char| matches!(c, '#' | '0' | ',' | '.');
        let start = pattern.find(is_number_char).unwrap_or(pattern.len());
        let end = pattern[start..]
            .find(|c: char| !is_number_char(c))
            .map(|i| start + i)
            .unwrap_or(pattern.len());
        let (prefix, number, suffix) = (&pattern[..start], &pattern[start..end], &pattern[end..]);

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        let grouping = int_part
            .rfind(',')
            .map(|i| int_part[i + 1..].chars().filter(|&c| c == '#' || c == '0').count())
            .unwrap_or(0);

        let affixes = format!("{}{}", prefix, suffix);
        let multiplier = if affixes.contains('%') {
            100.0
        } else if affixes.contains('\u{2030}') {
            1000.0
        } else {
            1.0
        };

        SubPattern {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            min_int: int_part.chars().filter(|&c| c == '0').count(),
            min_frac: frac_part.chars().filter(|&c| c == '0').count(),
            max_frac: frac_part.chars().filter(|&c| c == '0' || c == '#').count(),
            grouping,
            multiplier,
        }
    }

    fn format_magnitude(&self, magnitude: f64) -> String {
        let fixed = format!("{:.*}", self.max_frac, magnitude);
        let (int_digits, frac_digits) = match fixed.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (fixed, String::new()),
        };

        let mut frac = frac_digits;
        while frac.len() > self.min_frac && frac.ends_with('0') {
            frac.pop();
        }

        let mut int = int_digits.trim_start_matches('0').to_string();
        while int.len() < self.min_int {
            int.insert(0, '0');
        }
        if int.is_empty() && frac.is_empty() {
            int.push('0');
        }
        if self.grouping > 0 {
            int = group_digits(&int, ",", self.grouping);
        }

        if frac.is_empty() {
            int
        } else {
            format!("{}.{}", int, frac)
        }
    }
}

/// String for an `xsl:number value` that cannot be numbered
pub fn non_numeric(value: f64) -> String {
    number_to_string(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_list_formats() {
        assert_eq!(format_number_list(&[3], "1", None), "3");
        assert_eq!(format_number_list(&[3], "001", None), "003");
        assert_eq!(format_number_list(&[28], "a", None), "ab");
        assert_eq!(format_number_list(&[1999], "I", None), "MCMXCIX");
        assert_eq!(format_number_list(&[4], "i", None), "iv");
        assert_eq!(format_number_list(&[1, 2, 3], "1.a.i", None), "1.b.iii");
        assert_eq!(format_number_list(&[2, 5], "(1)", None), "(2.5)");
        assert_eq!(format_number_list(&[1, 2, 3], "1-1", None), "1-2-3");
    }

    #[test]
    fn test_number_grouping() {
        assert_eq!(format_number_list(&[1234567], "1", Some((",", 3))), "1,234,567");
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(1234.5, "#,##0.00"), "1,234.50");
        assert_eq!(format_decimal(0.5, "0%"), "50%");
        assert_eq!(format_decimal(-3.0, "0"), "-3");
        assert_eq!(format_decimal(-3.0, "0;(0)"), "(3)");
        assert_eq!(format_decimal(3.14159, "0.##"), "3.14");
        assert_eq!(format_decimal(7.0, "000"), "007");
        assert_eq!(format_decimal(f64::NAN, "0"), "NaN");
        assert_eq!(format_decimal(f64::INFINITY, "0"), "Infinity");
    }
}
