use std::rc::Rc;

use itertools::Itertools;

use crate::operand::{Operand, Type, DEFAULT_PRECISION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    And,
    Or,
    Xor,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterEqual,
    LessEqual,
    Approximately,
    In,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::Greater => ">",
            Self::Less => "<",
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::Approximately => "=~",
            Self::In => "in",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        }
    }

    pub fn from_symbol(text: &str) -> Option<Self> {
        let op = match text.to_lowercase().as_str() {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "^" => Self::Pow,
            "and" => Self::And,
            "or" => Self::Or,
            "xor" => Self::Xor,
            "=" => Self::Equal,
            "<>" => Self::NotEqual,
            ">" => Self::Greater,
            "<" => Self::Less,
            ">=" => Self::GreaterEqual,
            "<=" => Self::LessEqual,
            "=~" => Self::Approximately,
            "in" => Self::In,
            "<<" => Self::ShiftLeft,
            ">>" => Self::ShiftRight,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Negate => "neg",
            Self::Not => "not",
        }
    }
}

/// Whether a symbol was written as a bare name or in call position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolRole {
    Variable,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub kind: Type,
}

#[derive(Debug)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub parameters: Vec<Parameter>,
    pub return_type: Option<Type>,
    pub body: Rc<Ast>,
    pub help: Option<String>,
}

/// The tree form of a program after constant folding. Names are upper-cased.
#[derive(Debug, Clone)]
pub enum Ast {
    Literal(Operand),
    Symbol { name: String, role: SymbolRole },
    Binary { op: BinaryOp, left: Box<Ast>, right: Box<Ast> },
    Unary { op: UnaryOp, operand: Box<Ast> },
    Sequence(Vec<Ast>),
    Binding { name: String, value: Box<Ast>, constant: bool },
    // (condition, consequent) pairs, the first true condition wins
    Selection(Vec<(Ast, Ast)>),
    While { condition: Box<Ast>, body: Box<Ast> },
    FunctionDef(Rc<FunctionDef>),
    Call { function: Box<Ast>, arguments: Vec<Ast> },
    List(Vec<Ast>),
}

// Uniform node view shared by both renderers
enum View<'a> {
    Node(&'a Ast),
    Pair(Box<View<'a>>, Box<View<'a>>),
    Text(String),
}

impl<'a> View<'a> {
    fn parts(&self) -> (String, Vec<View<'a>>) {
        match self {
            Self::Node(ast) => Ast::parts(*ast),
            Self::Pair(a, b) => ("pair".to_owned(), vec![a.shallow(), b.shallow()]),
            Self::Text(text) => (text.clone(), vec![]),
        }
    }

    fn shallow(&self) -> View<'a> {
        match self {
            Self::Node(ast) => View::Node(*ast),
            Self::Pair(a, b) => View::Pair(Box::new(a.shallow()), Box::new(b.shallow())),
            Self::Text(text) => View::Text(text.clone()),
        }
    }

    fn sexpr(&self) -> String {
        let (label, children) = self.parts();
        if children.is_empty() {
            return label;
        }
        format!("({} {})", label, children.iter().map(View::sexpr).join(" "))
    }
}

impl Ast {
    pub fn literal(&self) -> Option<&Operand> {
        match self {
            Self::Literal(operand) => Some(operand),
            _ => None,
        }
    }

    /// True when evaluating the tree can't call a function, read a binding
    /// or branch, so its value depends on nothing but the tree itself
    pub fn is_deterministic(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Binary { left, right, .. } => left.is_deterministic() && right.is_deterministic(),
            Self::Unary { operand, .. } => operand.is_deterministic(),
            Self::List(elements) | Self::Sequence(elements) => elements.iter().all(Ast::is_deterministic),
            _ => false,
        }
    }

    fn parts(&self) -> (String, Vec<View<'_>>) {
        match self {
            Self::Literal(operand) => (operand.repr(DEFAULT_PRECISION), vec![]),
            Self::Symbol { name, .. } => (name.clone(), vec![]),
            Self::Binary { op, left, right } => (op.symbol().to_owned(), vec![View::Node(left), View::Node(right)]),
            Self::Unary { op, operand } => (op.symbol().to_owned(), vec![View::Node(operand)]),
            Self::Sequence(children) => ("sequence".to_owned(), children.iter().map(View::Node).collect()),
            Self::Binding { name, value, constant } => {
                let label = if *constant { "is" } else { "bind" };
                (label.to_owned(), vec![View::Text(name.clone()), View::Node(value)])
            }
            Self::Selection(pairs) => (
                "select".to_owned(),
                pairs.iter()
                    .map(|(condition, consequent)| {
                        View::Pair(Box::new(View::Node(condition)), Box::new(View::Node(consequent)))
                    })
                    .collect(),
            ),
            Self::While { condition, body } => ("while".to_owned(), vec![View::Node(condition), View::Node(body)]),
            Self::FunctionDef(definition) => {
                let mut children = vec![];
                children.extend(definition.name.clone().map(View::Text));
                children.extend(definition.parameters.iter().map(|parameter| {
                    View::Pair(
                        Box::new(View::Text(parameter.name.clone())),
                        Box::new(View::Text(parameter.kind.to_string())),
                    )
                }));
                children.extend(definition.return_type.map(|kind| View::Text(kind.to_string())));
                children.push(View::Node(&definition.body));
                ("fundef".to_owned(), children)
            }
            Self::Call { function, arguments } => {
                let mut children = vec![View::Node(function)];
                children.extend(arguments.iter().map(View::Node));
                ("funcall".to_owned(), children)
            }
            Self::List(elements) => ("list".to_owned(), elements.iter().map(View::Node).collect()),
        }
    }

    /// S-expression rendering, e.g. `(+ (* 3 X) 1)`
    pub fn to_sexpr(&self) -> String {
        View::Node(self).sexpr()
    }

    /// Graphviz rendering of the tree
    pub fn to_dot(&self) -> String {
        let mut lines = vec!["digraph AST {".to_owned()];
        let mut next_id = 0;
        Self::dot_node(&View::Node(self), &mut next_id, &mut lines);
        lines.push("}".to_owned());
        lines.join("\n")
    }

    fn dot_node(view: &View, next_id: &mut usize, lines: &mut Vec<String>) -> usize {
        let id = *next_id;
        *next_id += 1;

        let (label, children) = view.parts();
        lines.push(format!("  n{} [label=\"{}\"];", id, label.replace('\\', "\\\\").replace('"', "\\\"")));
        for child in &children {
            let child_id = Self::dot_node(child, next_id, lines);
            lines.push(format!("  n{} -> n{};", id, child_id));
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn symbol(name: &str) -> Ast {
        Ast::Symbol { name: name.to_owned(), role: SymbolRole::Variable }
    }

    fn binary(op: BinaryOp, left: Ast, right: Ast) -> Ast {
        Ast::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    #[test]
    fn sexpr_rendering() {
        let ast = binary(BinaryOp::Add, binary(BinaryOp::Mul, Ast::Literal(Operand::from(3)), symbol("X")), Ast::Literal(Operand::from(1)));
        assert_eq!(ast.to_sexpr(), "(+ (* 3 X) 1)");

        let selection = Ast::Selection(vec![(symbol("C"), Ast::Literal(Operand::from("yes")))]);
        assert_eq!(selection.to_sexpr(), "(select (pair C \"yes\"))");
    }

    #[test]
    fn dot_rendering() {
        let ast = binary(BinaryOp::Sub, symbol("X"), Ast::Literal(Operand::from("a")));
        let dot = ast.to_dot();
        assert!(dot.starts_with("digraph AST {"));
        assert!(dot.contains("n0 [label=\"-\"];"));
        assert!(dot.contains("n2 [label=\"\\\"a\\\"\"];"));
        assert!(dot.contains("n0 -> n1;"));
        assert!(dot.contains("n0 -> n2;"));
    }

    #[test]
    fn determinism() {
        let pure = binary(BinaryOp::Add, Ast::List(vec![Ast::Literal(Operand::from(1))]), Ast::Literal(Operand::from(2)));
        assert!(pure.is_deterministic());

        let lookup = binary(BinaryOp::Add, symbol("X"), Ast::Literal(Operand::from(2)));
        assert!(!lookup.is_deterministic());

        let call = Ast::Call {
            function: Box::new(Ast::Symbol { name: "F".to_owned(), role: SymbolRole::Function }),
            arguments: vec![],
        };
        assert!(!call.is_deterministic());
    }

    #[test]
    fn operator_symbols() {
        assert_eq!(BinaryOp::from_symbol("XOR"), Some(BinaryOp::Xor));
        assert_eq!(BinaryOp::from_symbol("=~"), Some(BinaryOp::Approximately));
        assert_eq!(BinaryOp::from_symbol("=>"), None);
    }
}
