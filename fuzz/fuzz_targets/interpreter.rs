#![no_main]

use core::fmt;

use itertools::Itertools;
use libfuzzer_sys::{arbitrary::Arbitrary, fuzz_target};
use vela::{Interpreter, InterpreterConfig};

// Literals, operators and intrinsics. No while loops, they need not terminate
#[derive(Arbitrary, Debug)]
enum VelaAtom {
    Add, Sub, Mul, Div, Pow,
    And, Or, Xor, In,
    Greater, GreaterEq,
    Less, LessEq, Eq, NotEq, Matches,
    True, False,

    Head, Tail, Nth, Length,
    Concat, Append, Seq,
    Map, Filter, Reduce,

    Identifier(String),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for VelaAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self {
            VelaAtom::Add => "+",
            VelaAtom::Sub => "-",
            VelaAtom::Mul => "*",
            VelaAtom::Div => "/",
            VelaAtom::Pow => "^",
            VelaAtom::And => "and",
            VelaAtom::Or => "or",
            VelaAtom::Xor => "xor",
            VelaAtom::In => "in",
            VelaAtom::Greater => ">",
            VelaAtom::GreaterEq => ">=",
            VelaAtom::Less => "<",
            VelaAtom::LessEq => "<=",
            VelaAtom::Eq => "=",
            VelaAtom::NotEq => "<>",
            VelaAtom::Matches => "=~",
            VelaAtom::True => "true",
            VelaAtom::False => "false",
            VelaAtom::Head => "head",
            VelaAtom::Tail => "tail",
            VelaAtom::Nth => "nth",
            VelaAtom::Length => "length",
            VelaAtom::Concat => "concat",
            VelaAtom::Append => "append",
            VelaAtom::Seq => "seq",
            VelaAtom::Map => "map",
            VelaAtom::Filter => "filter",
            VelaAtom::Reduce => "reduce",
            VelaAtom::Identifier(identifier) => identifier,
            VelaAtom::Integer(value) => return write!(f, "{}", value),
            VelaAtom::Real(value) => return write!(f, "{:?}", value),
            VelaAtom::Text(text) => return write!(f, "\"{}\"", text.replace('"', "")),
        })
    }
}

#[derive(Arbitrary, Debug)]
enum VelaCommand {
    Call(VelaAtom, Vec<VelaCommand>),
    List(Vec<VelaCommand>),
    Block(Vec<VelaCommand>),
    Lambda(Vec<String>, Vec<VelaCommand>),
    Bind(String, Box<VelaCommand>),
    If(Box<VelaCommand>, Box<VelaCommand>, Box<VelaCommand>),

    Atom(VelaAtom),
}

fn stringify_arguments(values: &[VelaCommand]) -> String {
    values.iter()
        .map(VelaCommand::to_string)
        .join(" ")
}

impl fmt::Display for VelaCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VelaCommand::Atom(atom) => atom.fmt(f),
            VelaCommand::Call(function, args) => write!(f, "{}({})", function, stringify_arguments(args)),
            VelaCommand::List(elements) => write!(f, "[{}]", stringify_arguments(elements)),
            VelaCommand::Block(statements) => write!(f, "{{ {} }}", stringify_arguments(statements)),
            VelaCommand::Lambda(parameters, body) => write!(
                f,
                "function({}) {{ {} }}",
                parameters.iter().map(|name| format!("{}:integer", name)).join(" "),
                stringify_arguments(body)
            ),
            VelaCommand::Bind(name, value) => write!(f, "{} <- {}", name, value),
            VelaCommand::If(condition, consequent, alternative) => {
                write!(f, "if {} then {} else {}", condition, consequent, alternative)
            }
        }
    }
}

fuzz_target!(|commands: Vec<VelaCommand>| {
    {
        let config = InterpreterConfig { standard_library: false, ..Default::default() };
        let Ok(mut interpreter) = Interpreter::new(config) else { return };
        interpreter.set_output(Box::new(std::io::sink()));

        for command in commands {
            let command = command.to_string();
            let _ = interpreter.program(&command);
        }
    }
});
