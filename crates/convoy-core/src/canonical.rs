//! Canonical JSON (RFC 8785 JCS) for signing and verification
//!
//! Every signature in the convoy stack (passports, rotation proofs, RPC
//! auth) is computed over the output of this module. Both sides of a
//! signature must produce byte-identical serializations, so the rules here
//! follow RFC 8785 and ECMAScript `JSON.stringify()` semantics: object keys
//! sorted by code point, minimal string escaping, and deterministic number
//! rendering.

use serde_json::Value;

use crate::error::{Error, Result};

/// Serialize a JSON value to its canonical (JCS) form.
pub fn canonical_json(value: &Value) -> Result<String> {
    let mut out = String::with_capacity(128);
    write_value(&mut out, value)?;
    Ok(out)
}

/// Canonical bytes of a value, ready to sign or verify.
pub fn signing_bytes(value: &Value) -> Result<Vec<u8>> {
    canonical_json(value).map(String::into_bytes)
}

fn write_value(out: &mut String, value: &Value) -> Result<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, n)?,
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(out, item)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));

            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                // Key came from the map, so the lookup cannot miss.
                if let Some(v) = map.get(key) {
                    write_value(out, v)?;
                }
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_number(out: &mut String, n: &serde_json::Number) -> Result<()> {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
        return Ok(());
    }
    match n.as_f64() {
        Some(f) => write_double(out, f),
        None => Err(Error::Canonical(format!("unsupported JSON number: {n}"))),
    }
}

/// JCS rendering of an IEEE-754 double, matching `JSON.stringify()`.
fn write_double(out: &mut String, v: f64) -> Result<()> {
    if !v.is_finite() {
        return Err(Error::Canonical(
            "non-finite numbers are not valid JSON".to_string(),
        ));
    }
    if v == 0.0 {
        // -0 normalizes to 0
        out.push('0');
        return Ok(());
    }

    if v.is_sign_negative() {
        out.push('-');
    }
    let abs = v.abs();

    // std float formatting is not a stable cross-language contract; ryu gives
    // the deterministic shortest representation, which we re-render per JCS.
    let mut buf = ryu::Buffer::new();
    let (digits, exp10) = scientific_parts(buf.format_finite(abs))?;

    if (1e-6..1e21).contains(&abs) {
        write_plain_decimal(out, &digits, exp10);
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        if exp10 >= 0 {
            out.push('+');
        }
        out.push_str(&exp10.to_string());
    }
    Ok(())
}

/// Decompose a ryu-rendered float into significant digits and the exponent
/// of its leading digit (`d.ddd * 10^exp10` form).
fn scientific_parts(repr: &str) -> Result<(String, i32)> {
    let (mantissa, exp_part) = match repr.split_once(['e', 'E']) {
        Some((m, e)) => {
            let exp: i32 = e
                .parse()
                .map_err(|_| Error::Canonical(format!("invalid float exponent in {repr:?}")))?;
            (m, Some(exp))
        }
        None => (repr, None),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f.trim_end_matches('0')),
        None => (mantissa, ""),
    };

    let mut digits = String::with_capacity(int_part.len() + frac_part.len());
    digits.push_str(int_part);
    digits.push_str(frac_part);
    let trimmed = digits.trim_start_matches('0').trim_end_matches('0');
    let digits = if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    };

    let exp10 = match exp_part {
        Some(exp) => exp + int_part.len() as i32 - 1,
        None => {
            let int_trimmed = int_part.trim_start_matches('0');
            if int_trimmed.is_empty() {
                let zeros = frac_part.chars().take_while(|c| *c == '0').count() as i32;
                -(zeros + 1)
            } else {
                int_trimmed.len() as i32 - 1
            }
        }
    };

    Ok((digits, exp10))
}

/// Render pre-trimmed significant digits at the given exponent without
/// scientific notation.
fn write_plain_decimal(out: &mut String, digits: &str, exp10: i32) {
    let len = digits.len() as i32;
    let shift = exp10 - (len - 1);

    if shift >= 0 {
        out.push_str(digits);
        for _ in 0..shift {
            out.push('0');
        }
        return;
    }

    let split = len + shift;
    if split > 0 {
        out.push_str(&digits[..split as usize]);
        out.push('.');
        out.push_str(&digits[split as usize..]);
    } else {
        out.push_str("0.");
        for _ in 0..(-split) {
            out.push('0');
        }
        out.push_str(digits);
    }
}
