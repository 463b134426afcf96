//! Operator semantics shared by the interpreter and the compiled-loop machine.

use std::cmp::Ordering;

use crate::ast::{BinOp, UnOp};
use crate::error::EmuError;
use crate::limits::MAX_ALLOC_LEN;
use crate::value::VbaValue;

pub(crate) fn eval_unop(op: UnOp, v: VbaValue) -> Result<VbaValue, EmuError> {
    match op {
        UnOp::Neg => Ok(match v.to_number() {
            VbaValue::Float(f) => VbaValue::Float(-f),
            other => VbaValue::Integer(other.to_int().wrapping_neg()),
        }),
        UnOp::Not => Ok(match v {
            VbaValue::Boolean(b) => VbaValue::Boolean(!b),
            other => VbaValue::Integer(!other.to_int()),
        }),
    }
}

fn join_strings(a: &str, b: &str) -> Result<VbaValue, EmuError> {
    let len = a.len() + b.len();
    if len > MAX_ALLOC_LEN {
        return Err(EmuError::out_of_string_space(format!(
            "concatenation of {len} bytes"
        )));
    }
    let mut joined = String::with_capacity(len);
    joined.push_str(a);
    joined.push_str(b);
    Ok(VbaValue::String(joined))
}

pub(crate) fn eval_binop(op: BinOp, l: VbaValue, r: VbaValue) -> Result<VbaValue, EmuError> {
    match op {
        BinOp::Add => {
            if let (VbaValue::String(a), VbaValue::String(b)) = (&l, &r) {
                return join_strings(a, b);
            }
            if matches!(l, VbaValue::String(_)) && !looks_numeric(&l)
                || matches!(r, VbaValue::String(_)) && !looks_numeric(&r)
            {
                return Err(EmuError::type_mismatch(format!(
                    "cannot add {} and {}",
                    l.type_name(),
                    r.type_name()
                )));
            }
            Ok(arith(&l, &r, i64::checked_add, |a, b| a + b))
        }
        BinOp::Sub => Ok(arith(&l, &r, i64::checked_sub, |a, b| a - b)),
        BinOp::Mul => Ok(arith(&l, &r, i64::checked_mul, |a, b| a * b)),
        BinOp::Div => {
            let d = r.to_f64();
            if d == 0.0 {
                return Err(EmuError::division_by_zero());
            }
            Ok(VbaValue::Float(l.to_f64() / d))
        }
        BinOp::IntDiv => {
            let (a, b) = (round_operand(&l), round_operand(&r));
            if b == 0 {
                return Err(EmuError::division_by_zero());
            }
            Ok(VbaValue::Integer(a.wrapping_div(b)))
        }
        BinOp::Mod => {
            let (a, b) = (round_operand(&l), round_operand(&r));
            if b == 0 {
                return Err(EmuError::division_by_zero());
            }
            Ok(VbaValue::Integer(a.wrapping_rem(b)))
        }
        BinOp::Pow => Ok(VbaValue::Float(l.to_f64().powf(r.to_f64()))),
        BinOp::Concat => join_strings(&l.to_string_lossy(), &r.to_string_lossy()),
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = compare(&l, &r);
            let res = match op {
                BinOp::Eq => ord == Some(Ordering::Equal),
                BinOp::Ne => ord != Some(Ordering::Equal),
                BinOp::Lt => ord == Some(Ordering::Less),
                BinOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
                BinOp::Gt => ord == Some(Ordering::Greater),
                _ => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
            };
            Ok(VbaValue::Boolean(res))
        }
        BinOp::And | BinOp::Or | BinOp::Xor => {
            if let (VbaValue::Boolean(a), VbaValue::Boolean(b)) = (&l, &r) {
                let res = match op {
                    BinOp::And => *a && *b,
                    BinOp::Or => *a || *b,
                    _ => a ^ b,
                };
                return Ok(VbaValue::Boolean(res));
            }
            let (a, b) = (l.to_int(), r.to_int());
            let res = match op {
                BinOp::And => a & b,
                BinOp::Or => a | b,
                _ => a ^ b,
            };
            Ok(VbaValue::Integer(res))
        }
    }
}

/// Integer arithmetic while both sides are integral and the result fits, float otherwise.
fn arith(
    l: &VbaValue,
    r: &VbaValue,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> VbaValue {
    match (l.to_number(), r.to_number()) {
        (VbaValue::Integer(a), VbaValue::Integer(b)) => match int_op(a, b) {
            Some(v) => VbaValue::Integer(v),
            None => VbaValue::Float(float_op(a as f64, b as f64)),
        },
        (a, b) => VbaValue::Float(float_op(a.to_f64(), b.to_f64())),
    }
}

fn round_operand(v: &VbaValue) -> i64 {
    match v.to_number() {
        VbaValue::Float(f) if f.is_finite() => f.round_ties_even() as i64,
        other => other.to_int(),
    }
}

fn looks_numeric(v: &VbaValue) -> bool {
    match v {
        VbaValue::String(s) => {
            let t = s.trim().to_ascii_lowercase();
            !t.is_empty()
                && (t.parse::<f64>().is_ok() || t.starts_with("&h") || t.starts_with("&o"))
        }
        _ => true,
    }
}

/// Numeric comparison when both sides read as numbers, string comparison otherwise.
pub(crate) fn compare(l: &VbaValue, r: &VbaValue) -> Option<Ordering> {
    let numeric_side = |v: &VbaValue| match v {
        VbaValue::String(_) => looks_numeric(v),
        VbaValue::List(_) | VbaValue::Map(_) | VbaValue::Object(_) => false,
        _ => true,
    };
    let both_strings = matches!((l, r), (VbaValue::String(_), VbaValue::String(_)));
    if !both_strings && numeric_side(l) && numeric_side(r) {
        return l.to_f64().partial_cmp(&r.to_f64());
    }
    Some(l.to_string_lossy().cmp(&r.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn oversized_concatenation_is_refused() {
        let big = VbaValue::String("a".repeat(MAX_ALLOC_LEN));
        let err = eval_binop(BinOp::Concat, big.clone(), "b".into()).unwrap_err();
        assert_eq!(err.number(), 14);
        assert!(eval_binop(BinOp::Add, big.clone(), "b".into()).is_err());
        assert_eq!(
            eval_binop(BinOp::Concat, big, VbaValue::from("")).unwrap(),
            VbaValue::String("a".repeat(MAX_ALLOC_LEN))
        );
    }

    #[test]
    fn integer_arithmetic_stays_integral() {
        assert_eq!(
            eval_binop(BinOp::Add, 64.into(), 1.into()).unwrap(),
            VbaValue::Integer(65)
        );
        assert_eq!(
            eval_binop(BinOp::Add, "2".into(), 3.into()).unwrap(),
            VbaValue::Integer(5)
        );
        assert_eq!(
            eval_binop(BinOp::Add, "a".into(), "b".into()).unwrap(),
            VbaValue::from("ab")
        );
        assert!(matches!(
            eval_binop(BinOp::Add, "a".into(), 1.into()),
            Err(EmuError::Runtime { number: 13, .. })
        ));
        assert_eq!(
            eval_binop(BinOp::Mul, i64::MAX.into(), 2.into()).unwrap(),
            VbaValue::Float(i64::MAX as f64 * 2.0)
        );
    }

    #[test]
    fn division_and_modulo() {
        assert_eq!(
            eval_binop(BinOp::Div, 7.into(), 2.into()).unwrap(),
            VbaValue::Float(3.5)
        );
        assert_eq!(
            eval_binop(BinOp::IntDiv, 7.into(), 2.into()).unwrap(),
            VbaValue::Integer(3)
        );
        assert_eq!(
            eval_binop(BinOp::Mod, (-7).into(), 3.into()).unwrap(),
            VbaValue::Integer(-1)
        );
        assert!(matches!(
            eval_binop(BinOp::Div, 1.into(), 0.into()),
            Err(EmuError::Runtime { number: 11, .. })
        ));
    }

    #[test]
    fn logical_operators_are_bitwise_on_integers() {
        assert_eq!(
            eval_binop(BinOp::Xor, 3.into(), 5.into()).unwrap(),
            VbaValue::Integer(6)
        );
        assert_eq!(
            eval_binop(BinOp::And, true.into(), false.into()).unwrap(),
            VbaValue::Boolean(false)
        );
        assert_eq!(eval_unop(UnOp::Not, 0.into()).unwrap(), VbaValue::Integer(-1));
    }

    #[test]
    fn comparisons() {
        assert_eq!(
            eval_binop(BinOp::Lt, 2.into(), "10".into()).unwrap(),
            VbaValue::Boolean(true)
        );
        assert_eq!(
            eval_binop(BinOp::Lt, "2".into(), "10".into()).unwrap(),
            VbaValue::Boolean(false)
        );
        assert_eq!(
            eval_binop(BinOp::Eq, 1.into(), 1.0.into()).unwrap(),
            VbaValue::Boolean(true)
        );
    }
}
