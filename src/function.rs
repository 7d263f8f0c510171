use core::fmt;
use std::rc::Rc;

use itertools::Itertools;

use crate::{
    ast::Ast,
    environment::ScopeRef,
    error::{Result, VelaError},
    interpreter::Interpreter,
    operand::{HostObject, Operand, Type},
};

pub type NativeFn = Rc<dyn Fn(&mut Interpreter, Vec<Operand>) -> Result<Option<Operand>>>;

/// Host callback: receiver (if any), then the remaining arguments
pub type HostCallback = Rc<dyn Fn(Option<HostValue>, Vec<HostValue>) -> std::result::Result<HostValue, String>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Formals {
    Fixed(Vec<Type>),
    // Any number of arguments of any type
    Variadic,
}

/// What a host method is invoked on
#[derive(Clone)]
pub enum Receiver {
    Static,
    Bound(HostObject),
    // The first VeLa argument becomes the receiver
    FirstArgument,
}

#[derive(Clone)]
pub struct HostMethod {
    pub method: String,
    pub receiver: Receiver,
    pub callback: HostCallback,
}

pub struct UserFunction {
    pub parameters: Vec<String>,
    pub body: Rc<Ast>,
    // Snapshot of the non-global scopes at definition time
    pub captured: ScopeRef,
}

pub enum FunctionBody {
    Native(NativeFn),
    Host(HostMethod),
    User(UserFunction),
}

/// Everything needed to select and invoke one function overload
pub struct FunctionDescriptor {
    pub name: Option<String>,
    pub formals: Formals,
    // `None` means the function returns nothing
    pub return_type: Option<Type>,
    pub help: Option<String>,
    pub body: FunctionBody,
}

impl FunctionDescriptor {
    pub fn native(
        name: &str,
        parameter_types: Vec<Type>,
        return_type: Option<Type>,
        body: impl Fn(&mut Interpreter, Vec<Operand>) -> Result<Option<Operand>> + 'static,
    ) -> Self {
        Self {
            name: Some(name.to_uppercase()),
            formals: Formals::Fixed(parameter_types),
            return_type,
            help: None,
            body: FunctionBody::Native(Rc::new(body)),
        }
    }

    pub fn variadic(
        name: &str,
        return_type: Option<Type>,
        body: impl Fn(&mut Interpreter, Vec<Operand>) -> Result<Option<Operand>> + 'static,
    ) -> Self {
        Self {
            formals: Formals::Variadic,
            ..Self::native(name, vec![], return_type, body)
        }
    }

    pub fn host(name: &str, parameter_types: Vec<Type>, return_type: Option<Type>, method: HostMethod) -> Self {
        Self {
            name: Some(name.to_uppercase()),
            formals: Formals::Fixed(parameter_types),
            return_type,
            help: None,
            body: FunctionBody::Host(method),
        }
    }

    pub fn with_help(mut self, help: &str) -> Self {
        self.help = Some(help.to_owned());
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("λ")
    }

    pub fn conforms(&self, arguments: &[Operand]) -> bool {
        match &self.formals {
            Formals::Variadic => true,
            Formals::Fixed(types) => {
                types.len() == arguments.len()
                    && types.iter().zip(arguments).all(|(kind, argument)| argument.conforms_to(*kind))
            }
        }
    }

    /// Converts conforming arguments to the declared parameter types
    pub fn coerce(&self, arguments: Vec<Operand>, precision: usize) -> Vec<Operand> {
        match &self.formals {
            Formals::Variadic => arguments,
            Formals::Fixed(types) => arguments.into_iter()
                .zip(types)
                .map(|(argument, kind)| argument.convert(*kind, precision).unwrap_or(argument))
                .collect(),
        }
    }

    /// Applies the return type rules to what the body produced
    pub fn check_result(&self, result: Option<Operand>, precision: usize) -> Result<Option<Operand>> {
        match (self.return_type, result) {
            (None, None) => Ok(None),
            (None, Some(value)) => Err(VelaError::eval(format!(
                "{} returned {} but declares no return type",
                self,
                value.repr(precision)
            ))),
            (Some(kind), None) => Err(VelaError::eval(format!("{} returned no value, expected {}", self, kind))),
            (Some(kind), Some(value)) => match value.convert(kind, precision) {
                Some(converted) => Ok(Some(converted)),
                None => Err(VelaError::eval(format!(
                    "{} returned {}, expected {}",
                    self,
                    value.type_of(),
                    kind
                ))),
            },
        }
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parameters = match &self.formals {
            Formals::Variadic => "...".to_owned(),
            Formals::Fixed(types) => types.iter().join(", "),
        };
        write!(f, "{}({})", self.display_name(), parameters)?;
        if let Some(kind) = self.return_type {
            write!(f, " : {}", kind)?;
        }
        Ok(())
    }
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self)
    }
}

/// A value crossing into or out of a host method
#[derive(Debug, Clone)]
pub enum HostValue {
    Unit,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    List(Vec<HostValue>),
    Object(HostObject),
}

impl HostValue {
    pub fn from_operand(operand: &Operand) -> Result<Self> {
        let value = match operand {
            Operand::Integer(value) => Self::Integer(*value),
            Operand::Real(value) => Self::Real(*value),
            Operand::Boolean(value) => Self::Boolean(*value),
            Operand::String(value) => Self::String(value.clone()),
            Operand::List(values) => Self::List(values.iter().map(Self::from_operand).collect::<Result<_>>()?),
            Operand::Object(object) => Self::Object(object.clone()),
            Operand::Function(_) | Operand::None => {
                return Err(VelaError::eval(format!("{} can't be passed to a host method", operand.type_of())))
            }
        };
        Ok(value)
    }

    fn into_operand(self) -> Option<Operand> {
        match self {
            Self::Unit => None,
            Self::Integer(value) => Some(Operand::Integer(value)),
            Self::Real(value) => Some(Operand::Real(value)),
            Self::Boolean(value) => Some(Operand::Boolean(value)),
            Self::String(value) => Some(Operand::String(value)),
            Self::List(values) => Some(Operand::list(
                values.into_iter().map(|value| value.into_operand().unwrap_or(Operand::None)).collect(),
            )),
            Self::Object(object) => Some(Operand::Object(object)),
        }
    }

    pub fn as_integer(&self) -> std::result::Result<i64, String> {
        match self {
            Self::Integer(value) => Ok(*value),
            other => Err(format!("expected an integer, got {:?}", other)),
        }
    }

    pub fn as_real(&self) -> std::result::Result<f64, String> {
        match self {
            Self::Integer(value) => Ok(*value as f64),
            Self::Real(value) => Ok(*value),
            other => Err(format!("expected a real, got {:?}", other)),
        }
    }

    pub fn as_str(&self) -> std::result::Result<&str, String> {
        match self {
            Self::String(value) => Ok(value),
            other => Err(format!("expected a string, got {:?}", other)),
        }
    }
}

impl HostMethod {
    pub fn new(
        method: &str,
        receiver: Receiver,
        callback: impl Fn(Option<HostValue>, Vec<HostValue>) -> std::result::Result<HostValue, String> + 'static,
    ) -> Self {
        Self { method: method.to_owned(), receiver, callback: Rc::new(callback) }
    }

    /// Marshals the arguments, calls into the host and wraps the result.
    /// Host failures come back as evaluation errors with the host's message.
    pub fn invoke(&self, arguments: Vec<Operand>, return_type: Option<Type>) -> Result<Option<Operand>> {
        let mut values = arguments.iter().map(HostValue::from_operand).collect::<Result<Vec<_>>>()?;
        let receiver = match &self.receiver {
            Receiver::Static => None,
            Receiver::Bound(object) => Some(HostValue::Object(object.clone())),
            Receiver::FirstArgument if values.is_empty() => {
                return Err(VelaError::eval(format!("{}: missing receiver", self.method)))
            }
            Receiver::FirstArgument => Some(values.remove(0)),
        };

        let result = (self.callback)(receiver, values)
            .map_err(|message| VelaError::eval(format!("{}: {}", self.method, message)))?;

        match return_type {
            None => Ok(None),
            Some(_) => Ok(result.into_operand()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn square() -> FunctionDescriptor {
        FunctionDescriptor::native("square", vec![Type::Real], Some(Type::Real), |_, arguments| {
            let value = arguments[0].as_real().unwrap_or_default();
            Ok(Some(Operand::Real(value * value)))
        })
    }

    #[test]
    fn conformance_and_coercion() {
        let function = square();
        assert!(function.conforms(&[Operand::from(3)]));
        assert!(function.conforms(&[Operand::from(3.5)]));
        assert!(!function.conforms(&[Operand::from("3")]));
        assert!(!function.conforms(&[Operand::from(1), Operand::from(2)]));
        assert_eq!(function.coerce(vec![Operand::from(3)], 6), vec![Operand::Real(3.0)]);
    }

    #[test]
    fn signature_display() {
        assert_eq!(square().to_string(), "SQUARE(REAL) : REAL");
        let print = FunctionDescriptor::variadic("print", None, |_, _| Ok(None));
        assert_eq!(print.to_string(), "PRINT(...)");
    }

    #[test]
    fn return_type_rules() {
        let function = square();
        assert_eq!(function.check_result(Some(Operand::from(2)), 6).unwrap(), Some(Operand::Real(2.0)));
        assert!(function.check_result(None, 6).is_err());
        assert!(function.check_result(Some(Operand::from("x")), 6).is_err());

        let procedure = FunctionDescriptor::native("p", vec![], None, |_, _| Ok(None));
        assert!(procedure.check_result(Some(Operand::from(1)), 6).is_err());
        assert_eq!(procedure.check_result(None, 6).unwrap(), None);
    }

    #[test]
    fn host_errors_keep_their_message() {
        let method = HostMethod::new("divide", Receiver::Static, |_, arguments| {
            let divisor = arguments[1].as_integer()?;
            if divisor == 0 {
                return Err("divide by zero".to_owned());
            }
            Ok(HostValue::Integer(arguments[0].as_integer()? / divisor))
        });

        let result = method.invoke(vec![Operand::from(6), Operand::from(3)], Some(Type::Integer)).unwrap();
        assert_eq!(result, Some(Operand::from(2)));

        let error = method.invoke(vec![Operand::from(6), Operand::from(0)], Some(Type::Integer)).unwrap_err();
        assert_eq!(error, VelaError::eval("divide: divide by zero"));
    }

    #[test]
    fn first_argument_receiver() {
        let method = HostMethod::new("upper", Receiver::FirstArgument, |receiver, _| {
            let text = receiver.ok_or("no receiver")?;
            Ok(HostValue::String(text.as_str()?.to_uppercase()))
        });
        let result = method.invoke(vec![Operand::from("abc")], Some(Type::String)).unwrap();
        assert_eq!(result, Some(Operand::from("ABC")));
    }
}
