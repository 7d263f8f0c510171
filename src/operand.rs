use core::fmt;
use std::{any::Any, rc::Rc};

use itertools::Itertools;

use crate::{error::{Result, VelaError}, function::FunctionDescriptor};

/// Number of decimal places used when a real is turned into a string,
/// unless the interpreter is configured otherwise
pub const DEFAULT_PRECISION: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Integer,
    Real,
    Boolean,
    String,
    List,
    Function,
    Object,
    None,
    // Only meaningful in function signatures: every operand conforms
    Any,
}

impl Type {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "INTEGER" | "ℤ" => Some(Self::Integer),
            "REAL" | "ℝ" => Some(Self::Real),
            "BOOLEAN" | "𝔹" => Some(Self::Boolean),
            "STRING" => Some(Self::String),
            "LIST" => Some(Self::List),
            "FUNCTION" | "Λ" => Some(Self::Function),
            "OBJECT" => Some(Self::Object),
            "ANY" => Some(Self::Any),
            _ => None,
        }
    }

    pub fn is_composite(self) -> bool {
        matches!(self, Self::List | Self::Function | Self::Object | Self::None)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Boolean => "BOOLEAN",
            Self::String => "STRING",
            Self::List => "LIST",
            Self::Function => "FUNCTION",
            Self::Object => "OBJECT",
            Self::None => "NONE",
            Self::Any => "ANY",
        };
        f.write_str(name)
    }
}

/// A reference to a value owned by the embedding host. The interpreter never
/// looks inside; host functions downcast it back to the concrete type.
#[derive(Clone)]
pub struct HostObject {
    type_name: Rc<str>,
    value: Rc<dyn Any>,
}

impl HostObject {
    pub fn new<T: Any>(type_name: &str, value: T) -> Self {
        Self { type_name: Rc::from(type_name), value: Rc::new(value) }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<object {}>", self.type_name)
    }
}

/// A runtime value tagged with its type. Operands are never mutated, every
/// operation builds a new one.
#[derive(Clone)]
pub enum Operand {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    List(Rc<Vec<Operand>>),
    Function(Rc<FunctionDescriptor>),
    Object(HostObject),
    None,
}

impl Operand {
    pub fn list(values: Vec<Operand>) -> Self {
        Self::List(Rc::new(values))
    }

    pub fn empty_list() -> Self {
        Self::List(Rc::new(Vec::new()))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn type_of(&self) -> Type {
        match self {
            Self::Integer(_) => Type::Integer,
            Self::Real(_) => Type::Real,
            Self::Boolean(_) => Type::Boolean,
            Self::String(_) => Type::String,
            Self::List(_) => Type::List,
            Self::Function(_) => Type::Function,
            Self::Object(_) => Type::Object,
            Self::None => Type::None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Integers widen to reals here, nothing else does
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Real(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Operand]> {
        match self {
            Self::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Rc<FunctionDescriptor>> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Converts to `required` if the conversion is allowed: the identity,
    /// integer to real widening and any scalar to its string form.
    pub fn convert(&self, required: Type, precision: usize) -> Option<Operand> {
        match (self, required) {
            (_, Type::Any) => Some(self.clone()),
            (value, required) if value.type_of() == required => Some(self.clone()),
            (Self::Integer(value), Type::Real) => Some(Self::Real(*value as f64)),
            (value, Type::String) if !value.type_of().is_composite() => {
                Some(Self::String(value.to_string_with(precision)))
            }
            _ => None,
        }
    }

    pub fn conforms_to(&self, required: Type) -> bool {
        match (self, required) {
            (_, Type::Any) => true,
            (Self::Integer(_), Type::Real) => true,
            (value, Type::String) => !value.type_of().is_composite(),
            (value, required) => value.type_of() == required,
        }
    }

    /// Brings two operands of a binary operation to a common type. A string
    /// on either side turns the other scalar into a string, an integer next
    /// to a real becomes a real. Composite operands are left alone.
    pub fn unify(a: Operand, b: Operand, precision: usize) -> (Operand, Operand) {
        match (&a, &b) {
            (Self::String(_), Self::String(_)) => (a, b),
            (Self::String(_), other) if !other.type_of().is_composite() => {
                let other = Self::String(other.to_string_with(precision));
                (a, other)
            }
            (other, Self::String(_)) if !other.type_of().is_composite() => {
                (Self::String(other.to_string_with(precision)), b)
            }
            (Self::Integer(value), Self::Real(_)) => (Self::Real(*value as f64), b),
            (Self::Real(_), Self::Integer(value)) => (a, Self::Real(*value as f64)),
            _ => (a, b),
        }
    }

    /// Human readable form: strings unquoted at the top level, quoted when
    /// nested in a list
    pub fn to_string_with(&self, precision: usize) -> String {
        match self {
            Self::Integer(value) => value.to_string(),
            Self::Real(value) => format_real(*value, precision),
            Self::Boolean(value) => value.to_string(),
            Self::String(value) => value.clone(),
            Self::List(values) => format!("[{}]", values.iter().map(|value| value.repr(precision)).join(" ")),
            Self::Function(function) => function.to_string(),
            Self::Object(object) => format!("{:?}", object),
            Self::None => "none".to_owned(),
        }
    }

    /// Source-like form, strings are quoted
    pub fn repr(&self, precision: usize) -> String {
        match self {
            Self::String(value) => format!("\"{}\"", value),
            other => other.to_string_with(precision),
        }
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::None, Self::None) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(DEFAULT_PRECISION))
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_of(), self.repr(DEFAULT_PRECISION))
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Formats a real with at most `precision` decimals, dropping trailing zeros
/// and a trailing decimal point
pub fn format_real(value: f64, precision: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }

    let text = format!("{:.*}", precision, value);
    let text = if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text.as_str()
    };

    match text {
        "-0" => "0".to_owned(),
        text => text.to_owned(),
    }
}

/// Parses a real number. A leading `+`, a `.` decimal point and an `e`/`E`
/// exponent are accepted; anything left over after the number is an error.
pub fn parse_real(text: &str) -> Result<f64> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let well_formed = digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !well_formed {
        return Err(VelaError::eval(format!("'{}' is not a real number", text)));
    }

    digits.parse::<f64>()
        .map_err(|_| VelaError::eval(format!("'{}' is not a real number", text)))
}

/// Parses a decimal, `0x` hexadecimal or `0b` binary integer
pub fn parse_integer(text: &str) -> Result<i64> {
    let lowered = text.to_ascii_lowercase();
    let parsed = if let Some(hex) = lowered.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else if let Some(binary) = lowered.strip_prefix("0b") {
        i64::from_str_radix(binary, 2)
    } else {
        lowered.parse::<i64>()
    };

    parsed.map_err(|err| VelaError::eval(format!("'{}' is not an integer: {}", text, err)))
}
