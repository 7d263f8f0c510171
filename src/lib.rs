mod ast;
mod builder;
mod builtin;
mod cache;
mod config;
mod environment;
mod error;
mod function;
mod interpreter;
mod lexer;
mod operand;
mod operators;
mod parser;
mod stdlib;

#[cfg(test)]
mod test_utils;

pub use ast::{Ast, BinaryOp, FunctionDef, Parameter, SymbolRole, UnaryOp};
pub use cache::CacheStats;
pub use config::InterpreterConfig;
pub use environment::{Environment, MapEnvironment};
pub use error::{Result, VelaError};
pub use function::{Formals, FunctionDescriptor, HostMethod, HostValue, Receiver};
pub use interpreter::Interpreter;
pub use lexer::{lexer, Lexeme, Token};
pub use operand::{HostObject, Operand, Type};
pub use parser::{parse, ParseTree, Production, Rule};
