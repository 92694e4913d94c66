//! Translator for the single statement form `return <literal>`.

use anyhow::{Result, bail};
use tracing::debug;

use super::push::BytecodeBuilder;

const RETURN_PREFIX: &str = "return ";

/// Literal accepted after `return `.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReturnLiteral<'a> {
    Nil,
    Boolean(bool),
    Number(f64),
    /// Text between the quotes, taken verbatim; escapes are not processed.
    String(&'a str),
}

/// Parse `source` as `return <literal>`. The prefix must be exactly
/// `return ` followed by the literal with nothing after it.
pub fn parse_return(source: &str) -> Result<ReturnLiteral<'_>> {
    let Some(literal) = source.strip_prefix(RETURN_PREFIX) else {
        bail!("expected `return <literal>`, got {:?}", source);
    };
    Ok(match literal {
        "nil" => ReturnLiteral::Nil,
        "true" => ReturnLiteral::Boolean(true),
        "false" => ReturnLiteral::Boolean(false),
        _ => {
            if let Some(n) = parse_number_literal(literal) {
                ReturnLiteral::Number(n)
            } else if let Some(inner) = literal
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
            {
                ReturnLiteral::String(inner)
            } else {
                bail!("unsupported literal {:?}", literal);
            }
        }
    })
}

/// Numeric literal check used by the translator and by value classification.
///
/// Follows C `strtod` in the "C" locale, and the whole text must be consumed.
/// Accepted forms:
/// - leading ASCII whitespace (including vertical tab), then an optional sign;
/// - decimal and exponent forms;
/// - `inf`/`infinity`/`nan` in any case, and `nan(chars)`;
/// - hexadecimal `0x` mantissas with an optional fraction and `p` exponent,
///   rounded to nearest-even.
pub(crate) fn parse_number_literal(text: &str) -> Option<f64> {
    let text = text.trim_start_matches(is_c_space);
    let (negative, unsigned) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let magnitude = if let Some(hex) = unsigned.strip_prefix("0x").or_else(|| unsigned.strip_prefix("0X")) {
        parse_hex_float(hex)?
    } else if is_nan_with_payload(unsigned) {
        f64::NAN
    } else {
        return text.parse::<f64>().ok();
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn is_c_space(c: char) -> bool {
    c.is_ascii_whitespace() || c == '\x0b'
}

fn is_nan_with_payload(text: &str) -> bool {
    if !text.get(..4).is_some_and(|head| head.eq_ignore_ascii_case("nan(")) {
        return false;
    }
    text[4..]
        .strip_suffix(')')
        .is_some_and(|payload| payload.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'))
}

// Clamp for `p` exponents; anything this large is already zero or infinity.
const EXPONENT_CLAMP: i64 = 1 << 20;
const MANTISSA_BITS: u32 = f64::MANTISSA_DIGITS;
const MIN_SUBNORMAL_EXP: i64 = -1074;
const MAX_EXP: i64 = 1023;

/// Hex mantissa after the `0x` prefix: `digits[.digits][p[+-]digits]`.
fn parse_hex_float(text: &str) -> Option<f64> {
    let (body, mut exponent) = match text.find(|c: char| c == 'p' || c == 'P') {
        Some(at) => (&text[..at], parse_binary_exponent(&text[at + 1..])?),
        None => (text, 0),
    };
    let (int_digits, frac_digits) = body.split_once('.').unwrap_or((body, ""));
    if int_digits.is_empty() && frac_digits.is_empty() {
        return None;
    }

    // Accumulate while another digit fits in 64 bits; later non-zero digits
    // only set the sticky bit.
    let mut mantissa = 0u64;
    let mut sticky = false;
    for (digit, fractional) in int_digits
        .chars()
        .map(|c| (c, false))
        .chain(frac_digits.chars().map(|c| (c, true)))
    {
        let d = u64::from(digit.to_digit(16)?);
        if mantissa >> 60 == 0 {
            mantissa = (mantissa << 4) | d;
            if fractional {
                exponent -= 4;
            }
        } else {
            sticky |= d != 0;
            if !fractional {
                exponent += 4;
            }
        }
    }
    if mantissa == 0 {
        return Some(0.0);
    }

    let shift = mantissa.leading_zeros();
    mantissa <<= shift;
    exponent -= i64::from(shift);
    if sticky {
        mantissa |= 1;
    }

    // Round once, at 53 bits or at the subnormal step, whichever is coarser.
    let dropped = (64 - i64::from(MANTISSA_BITS)).max(MIN_SUBNORMAL_EXP - exponent);
    if dropped > 64 {
        return Some(0.0);
    }
    let kept = shift_right_even(mantissa, dropped as u32);
    let scale = exponent + dropped;
    if scale > MAX_EXP {
        return Some(f64::INFINITY);
    }
    Some(kept as f64 * pow2(scale))
}

fn parse_binary_exponent(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude = digits
        .bytes()
        .fold(0i64, |acc, b| (acc * 10 + i64::from(b - b'0')).min(EXPONENT_CLAMP));
    Some(if negative { -magnitude } else { magnitude })
}

/// `value >> shift` rounded to nearest, ties to even. `shift` is 1..=64.
fn shift_right_even(value: u64, shift: u32) -> u64 {
    let wide = u128::from(value);
    let kept = wide >> shift;
    let rest = wide - (kept << shift);
    let half = 1u128 << (shift - 1);
    let round_up = rest > half || (rest == half && kept & 1 == 1);
    (kept + u128::from(round_up)) as u64
}

/// Exact `2^exp` for `exp` in `-1074..=1023`.
fn pow2(exp: i64) -> f64 {
    if exp >= -1022 {
        f64::from_bits(((exp + 1023) as u64) << 52)
    } else {
        f64::from_bits(1u64 << (exp - MIN_SUBNORMAL_EXP))
    }
}

impl BytecodeBuilder {
    /// Build the module for `source`, or a nil module when the form is not
    /// recognised. Use [`compile_strict`](Self::compile_strict) to tell the two
    /// apart.
    pub fn compile(&self, source: &str) -> Vec<u8> {
        match self.compile_strict(source) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(%err, "unsupported source, pushing nil");
                self.push_nil()
            }
        }
    }

    pub fn compile_strict(&self, source: &str) -> Result<Vec<u8>> {
        Ok(match parse_return(source)? {
            ReturnLiteral::Nil => self.push_nil(),
            ReturnLiteral::Boolean(b) => self.push_boolean(b),
            ReturnLiteral::Number(n) => self.push_number(n),
            ReturnLiteral::String(s) => self.push_string(s),
        })
    }
}

pub fn compile(source: &str) -> Vec<u8> {
    BytecodeBuilder::default().compile(source)
}

pub fn compile_strict(source: &str) -> Result<Vec<u8>> {
    BytecodeBuilder::default().compile_strict(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{create_push_boolean, create_push_nil, create_push_number, create_push_string};

    #[test]
    fn number_literals_follow_c_rules() {
        assert_eq!(parse_number_literal("42"), Some(42.0));
        assert_eq!(parse_number_literal("  -1.5e3"), Some(-1500.0));
        assert_eq!(parse_number_literal(".5"), Some(0.5));
        assert_eq!(parse_number_literal("0x1F"), Some(31.0));
        assert_eq!(parse_number_literal("-0x10"), Some(-16.0));
        assert_eq!(parse_number_literal("INF"), Some(f64::INFINITY));
        assert!(parse_number_literal("nan").is_some_and(f64::is_nan));
        assert!(parse_number_literal("nan(123)").is_some_and(f64::is_nan));
        assert!(parse_number_literal("-NAN(abc_1)").is_some_and(f64::is_nan));
        assert!(parse_number_literal("nan()").is_some_and(f64::is_nan));
    }

    #[test]
    fn hex_floats_take_binary_exponents() {
        assert_eq!(parse_number_literal("0x1p4"), Some(16.0));
        assert_eq!(parse_number_literal("0x1.8p1"), Some(3.0));
        assert_eq!(parse_number_literal("-0X.8P-1"), Some(-0.25));
        assert_eq!(parse_number_literal("0xA.p+2"), Some(40.0));
        assert_eq!(parse_number_literal("0x1.fffffffffffffp1023"), Some(f64::MAX));
        assert_eq!(parse_number_literal("0x1p1024"), Some(f64::INFINITY));
        assert_eq!(parse_number_literal("0x1p-1074"), Some(f64::from_bits(1)));
        assert_eq!(parse_number_literal("0x1.8p-1075"), Some(f64::from_bits(1)));
        assert_eq!(parse_number_literal("0x1p-1075"), Some(0.0));
        for text in ["0x1p", "0x1p+", "0xp1", "0x.p1", "0x1.2.3", "0x1q4"] {
            assert_eq!(parse_number_literal(text), None, "{text:?}");
        }
    }

    #[test]
    fn long_hex_mantissas_round_once() {
        // 2^57 + 17 sits past the halfway point between 2^57 and 2^57 + 32.
        assert_eq!(parse_number_literal("0x200000000000011"), Some(2f64.powi(57) + 32.0));
        // Ties go to the even neighbour.
        assert_eq!(parse_number_literal("0x20000000000001"), Some(2f64.powi(53)));
        assert_eq!(parse_number_literal("0x20000000000003"), Some(2f64.powi(53) + 4.0));
        // Digits past the kept window still break ties upward.
        assert_eq!(
            parse_number_literal("0x200000000000010000000001"),
            Some(2f64.powi(93) + 2f64.powi(41))
        );
    }

    #[test]
    fn only_c_locale_whitespace_is_skipped() {
        assert_eq!(parse_number_literal("\x0b\t\n 7"), Some(7.0));
        assert_eq!(parse_number_literal("\u{3000}5"), None);
        assert_eq!(parse_number_literal("\u{a0}5"), None);
    }

    #[test]
    fn partial_numbers_are_rejected() {
        for text in ["", "   ", "1 ", "12abc", "0x", "0xZZ", "1,5", "--1"] {
            assert_eq!(parse_number_literal(text), None, "{text:?}");
        }
    }

    #[test]
    fn parse_return_recognises_each_literal() {
        assert_eq!(parse_return("return nil").expect("nil"), ReturnLiteral::Nil);
        assert_eq!(parse_return("return false").expect("bool"), ReturnLiteral::Boolean(false));
        assert_eq!(parse_return("return 7").expect("number"), ReturnLiteral::Number(7.0));
        assert_eq!(
            parse_return("return \"a \\n b\"").expect("string"),
            ReturnLiteral::String("a \\n b")
        );
        assert_eq!(parse_return("return \"\"").expect("empty"), ReturnLiteral::String(""));
    }

    #[test]
    fn compile_matches_direct_builders() {
        assert_eq!(compile("return \"hi\""), create_push_string("hi"));
        assert_eq!(compile("return 3.5"), create_push_number(3.5));
        assert_eq!(compile("return true"), create_push_boolean(true));
        assert_eq!(compile("return nil"), create_push_nil());
    }

    #[test]
    fn unsupported_source_falls_back_to_nil() {
        assert_eq!(compile("garbage"), create_push_nil());
        assert_eq!(compile("return {}"), create_push_nil());
        assert_eq!(compile("return \""), create_push_nil());
        assert_eq!(compile(" return 1"), create_push_nil());
        assert_eq!(compile(""), create_push_nil());
        assert_eq!(compile("return"), create_push_nil());
        assert_eq!(compile("return "), create_push_nil());
    }

    #[test]
    fn hex_float_sources_compile_to_numbers() {
        assert_eq!(compile("return 0x1.8p1"), create_push_number(3.0));
        assert_eq!(compile("return 0x10"), create_push_number(16.0));
    }

    #[test]
    fn strict_mode_reports_unsupported_source() {
        let err = compile_strict("garbage").unwrap_err();
        assert!(err.to_string().contains("expected `return <literal>`"));
        let err = compile_strict("return x + 1").unwrap_err();
        assert!(err.to_string().contains("unsupported literal"));
        assert!(compile_strict("").is_err());
        assert!(compile_strict("return").is_err());
        let err = compile_strict("return ").unwrap_err();
        assert!(err.to_string().contains("unsupported literal"));
        assert_eq!(compile_strict("return nil").expect("nil"), create_push_nil());
    }
}
