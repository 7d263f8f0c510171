use std::cmp::Ordering;

use crate::{
    ast::{BinaryOp, UnaryOp},
    error::{Result, VelaError},
    interpreter::Interpreter,
    operand::{Operand, Type},
};

fn expected_types(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add | BinaryOp::Equal | BinaryOp::NotEqual => "INTEGER, REAL, STRING or BOOLEAN",
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow => "INTEGER or REAL",
        BinaryOp::Greater | BinaryOp::Less | BinaryOp::GreaterEqual | BinaryOp::LessEqual => {
            "INTEGER, REAL or STRING"
        }
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => "BOOLEAN or INTEGER",
        BinaryOp::ShiftLeft | BinaryOp::ShiftRight => "INTEGER",
        BinaryOp::Approximately => "STRING",
        BinaryOp::In => "STRING or LIST on the right",
    }
}

fn type_error(op: BinaryOp, left: &Operand, right: &Operand) -> VelaError {
    VelaError::eval(format!(
        "'{}' expects values of type {}, got {} and {}",
        op.symbol(),
        expected_types(op),
        left.type_of(),
        right.type_of()
    ))
}

fn compare(left: &Operand, right: &Operand) -> Option<Ordering> {
    match (left, right) {
        (Operand::Integer(a), Operand::Integer(b)) => Some(a.cmp(b)),
        (Operand::Real(a), Operand::Real(b)) => a.partial_cmp(b),
        (Operand::String(a), Operand::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// A negative exponent leaves the integers
fn integer_power(base: i64, exponent: i64) -> Operand {
    if exponent < 0 {
        return Operand::Real((base as f64).powf(exponent as f64));
    }
    Operand::Integer(base.wrapping_pow(u32::try_from(exponent).unwrap_or(u32::MAX)))
}

impl Interpreter {
    /// Applies a binary operator. Lists broadcast element-wise (pairwise for
    /// two lists of equal length), except for membership.
    pub(crate) fn apply_binary(&mut self, op: BinaryOp, left: Operand, right: Operand) -> Result<Operand> {
        if op == BinaryOp::In {
            return self.apply_membership(left, right);
        }

        match (&left, &right) {
            (Operand::List(lefts), Operand::List(rights)) => {
                if lefts.len() != rights.len() {
                    return Err(VelaError::eval(format!(
                        "lists must be of equal length for '{}', got {} and {}",
                        op.symbol(),
                        lefts.len(),
                        rights.len()
                    )));
                }
                let mut results = Vec::with_capacity(lefts.len());
                for (a, b) in lefts.iter().zip(rights.iter()) {
                    results.push(self.apply_binary(op, a.clone(), b.clone())?);
                }
                Ok(Operand::list(results))
            }
            (Operand::List(lefts), _) => {
                let mut results = Vec::with_capacity(lefts.len());
                for a in lefts.iter() {
                    results.push(self.apply_binary(op, a.clone(), right.clone())?);
                }
                Ok(Operand::list(results))
            }
            (_, Operand::List(rights)) => {
                let mut results = Vec::with_capacity(rights.len());
                for b in rights.iter() {
                    results.push(self.apply_binary(op, left.clone(), b.clone())?);
                }
                Ok(Operand::list(results))
            }
            _ => self.apply_scalar(op, left, right),
        }
    }

    fn apply_membership(&mut self, needle: Operand, haystack: Operand) -> Result<Operand> {
        match &haystack {
            Operand::List(values) => Ok(Operand::Boolean(values.contains(&needle))),
            Operand::String(text) => match needle.convert(Type::String, self.config.precision) {
                Some(Operand::String(part)) => Ok(Operand::Boolean(text.contains(part.as_str()))),
                _ => Err(type_error(BinaryOp::In, &needle, &haystack)),
            },
            _ => Err(type_error(BinaryOp::In, &needle, &haystack)),
        }
    }

    fn apply_scalar(&mut self, op: BinaryOp, left: Operand, right: Operand) -> Result<Operand> {
        use Operand::{Boolean, Integer, Real, String};

        let (left, right) = Operand::unify(left, right, self.config.precision);
        let result = match (op, &left, &right) {
            (BinaryOp::Add, Integer(a), Integer(b)) => Integer(a.wrapping_add(*b)),
            (BinaryOp::Add, Real(a), Real(b)) => Real(a + b),
            (BinaryOp::Add, String(a), String(b)) => String(format!("{}{}", a, b)),
            (BinaryOp::Sub, Integer(a), Integer(b)) => Integer(a.wrapping_sub(*b)),
            (BinaryOp::Sub, Real(a), Real(b)) => Real(a - b),
            (BinaryOp::Mul, Integer(a), Integer(b)) => Integer(a.wrapping_mul(*b)),
            (BinaryOp::Mul, Real(a), Real(b)) => Real(a * b),
            (BinaryOp::Div, Integer(a), Integer(0)) => {
                return Err(VelaError::eval(format!("{}/0: division by zero error", a)))
            }
            (BinaryOp::Div, Integer(a), Integer(b)) => Integer(a.wrapping_div(*b)),
            (BinaryOp::Div, Real(_), Real(b)) if *b == 0.0 => {
                return Err(VelaError::eval(format!("{}/0: division by zero error", left.to_string_with(self.config.precision))))
            }
            (BinaryOp::Div, Real(a), Real(b)) => Real(a / b),
            (BinaryOp::Pow, Integer(a), Integer(b)) => integer_power(*a, *b),
            (BinaryOp::Pow, Real(a), Real(b)) => Real(a.powf(*b)),
            (BinaryOp::And, Boolean(a), Boolean(b)) => Boolean(*a && *b),
            (BinaryOp::And, Integer(a), Integer(b)) => Integer(a & b),
            (BinaryOp::Or, Boolean(a), Boolean(b)) => Boolean(*a || *b),
            (BinaryOp::Or, Integer(a), Integer(b)) => Integer(a | b),
            (BinaryOp::Xor, Boolean(a), Boolean(b)) => Boolean(a != b),
            (BinaryOp::Xor, Integer(a), Integer(b)) => Integer(a ^ b),
            (BinaryOp::ShiftLeft, Integer(a), Integer(b)) => Integer(a.wrapping_shl(*b as u32)),
            (BinaryOp::ShiftRight, Integer(a), Integer(b)) => Integer(a.wrapping_shr(*b as u32)),
            (BinaryOp::Equal | BinaryOp::NotEqual, a, b)
                if a.type_of() == b.type_of() && !a.type_of().is_composite() =>
            {
                Boolean((a == b) == (op == BinaryOp::Equal))
            }
            (BinaryOp::Greater | BinaryOp::Less | BinaryOp::GreaterEqual | BinaryOp::LessEqual, a, b) => {
                let ordering = compare(a, b).ok_or_else(|| type_error(op, a, b))?;
                Boolean(match op {
                    BinaryOp::Greater => ordering == Ordering::Greater,
                    BinaryOp::Less => ordering == Ordering::Less,
                    BinaryOp::GreaterEqual => ordering != Ordering::Less,
                    _ => ordering != Ordering::Greater,
                })
            }
            (BinaryOp::Approximately, String(subject), String(pattern)) => {
                Boolean(self.cache.pattern(pattern)?.is_match(subject))
            }
            _ => return Err(type_error(op, &left, &right)),
        };
        Ok(result)
    }

    pub(crate) fn apply_unary(&mut self, op: UnaryOp, operand: Operand) -> Result<Operand> {
        match (op, &operand) {
            (_, Operand::List(values)) => {
                let mut results = Vec::with_capacity(values.len());
                for value in values.iter() {
                    results.push(self.apply_unary(op, value.clone())?);
                }
                Ok(Operand::list(results))
            }
            (UnaryOp::Negate, Operand::Integer(value)) => Ok(Operand::Integer(value.wrapping_neg())),
            (UnaryOp::Negate, Operand::Real(value)) => Ok(Operand::Real(-value)),
            (UnaryOp::Not, Operand::Boolean(value)) => Ok(Operand::Boolean(!value)),
            (UnaryOp::Not, Operand::Integer(value)) => Ok(Operand::Integer(!value)),
            (op, other) => {
                let expected = match op {
                    UnaryOp::Negate => "INTEGER or REAL",
                    UnaryOp::Not => "BOOLEAN or INTEGER",
                };
                Err(VelaError::eval(format!(
                    "'{}' expects a value of type {}, got {}",
                    op.symbol(),
                    expected,
                    other.type_of()
                )))
            }
        }
    }
}
