use std::rc::Rc;

use crate::{
    ast::{Ast, BinaryOp, FunctionDef, Parameter, SymbolRole, UnaryOp},
    error::{Result, VelaError},
    interpreter::Interpreter,
    lexer::{Lexeme, Token},
    operand::{parse_integer, parse_real, Operand, Type},
    parser::{ParseTree, Rule},
};

fn at(lexeme: &Lexeme, error: VelaError) -> VelaError {
    match error {
        VelaError::Eval(message) => VelaError::parse(message, lexeme.line, lexeme.column),
        parse => parse,
    }
}

fn unexpected(lexeme: &Lexeme) -> VelaError {
    VelaError::parse(format!("unexpected '{}'", lexeme.token.text()), lexeme.line, lexeme.column)
}

// Reported at the first token of the rule
fn malformed(rule: Rule, children: &[ParseTree]) -> VelaError {
    let (line, column) = children.iter()
        .find_map(ParseTree::first_lexeme)
        .map(|lexeme| (lexeme.line, lexeme.column))
        .unwrap_or((1, 1));
    VelaError::parse(format!("malformed {:?}", rule), line, column)
}

fn terminal<'t, 'b>(tree: &'t ParseTree<'b>) -> Option<&'t Lexeme<'b>> {
    match tree {
        ParseTree::Terminal(lexeme) => Some(lexeme),
        ParseTree::Rule { .. } => None,
    }
}

/// Turns a parse tree into an [Ast]. Operators applied to literals are
/// evaluated here, by the interpreter that asked for the tree.
pub(crate) struct AstBuilder<'i> {
    interpreter: &'i mut Interpreter,
}

impl<'i> AstBuilder<'i> {
    pub fn new(interpreter: &'i mut Interpreter) -> Self {
        Self { interpreter }
    }

    pub fn build(&mut self, tree: &ParseTree) -> Result<Ast> {
        match tree {
            ParseTree::Terminal(lexeme) => self.build_terminal(lexeme),
            ParseTree::Rule { rule, children } => self.build_rule(*rule, children),
        }
    }

    fn build_terminal(&mut self, lexeme: &Lexeme) -> Result<Ast> {
        let ast = match &lexeme.token {
            Token::Integer(text) => Ast::Literal(Operand::Integer(parse_integer(text).map_err(|err| at(lexeme, err))?)),
            Token::Real(text) => Ast::Literal(Operand::Real(parse_real(text).map_err(|err| at(lexeme, err))?)),
            Token::String(text) => Ast::Literal(Operand::string(&text[1..text.len() - 1])),
            token if token.is_keyword("TRUE") => Ast::Literal(Operand::Boolean(true)),
            token if token.is_keyword("FALSE") => Ast::Literal(Operand::Boolean(false)),
            Token::Identifier(name) => Ast::Symbol { name: name.to_uppercase(), role: SymbolRole::Variable },
            _ => return Err(unexpected(lexeme)),
        };
        Ok(ast)
    }

    fn build_all(&mut self, children: &[ParseTree]) -> Result<Vec<Ast>> {
        children.iter().map(|child| self.build(child)).collect()
    }

    fn build_rule(&mut self, rule: Rule, children: &[ParseTree]) -> Result<Ast> {
        match rule {
            Rule::Sequence => Ok(Ast::Sequence(self.build_all(children)?)),
            Rule::List => Ok(Ast::List(self.build_all(children)?)),
            Rule::Binding => self.build_binding(children),
            Rule::WhileLoop => match children {
                [condition, body] => Ok(Ast::While {
                    condition: Box::new(self.build(condition)?),
                    body: Box::new(self.build(body)?),
                }),
                _ => Err(malformed(rule, children)),
            },
            Rule::NamedFundef | Rule::AnonFundef => self.build_fundef(rule, children),
            Rule::Selection => self.build_selection(children),
            Rule::Disjunction
            | Rule::ExclusiveDisjunction
            | Rule::Conjunction
            | Rule::Relational
            | Rule::Shift
            | Rule::Additive
            | Rule::Multiplicative
            | Rule::Exponentiation => self.build_chain(rule, children),
            Rule::Unary | Rule::Negation => match children {
                [_, operand] => {
                    let op = if rule == Rule::Unary { UnaryOp::Negate } else { UnaryOp::Not };
                    let operand = self.build(operand)?;
                    self.monadic(op, operand)
                }
                _ => Err(malformed(rule, children)),
            },
            Rule::Funcall => self.build_funcall(children),
            Rule::Formal | Rule::ReturnType => Err(malformed(rule, children)),
        }
    }

    // `operand (operator operand)*`, folded from the left
    fn build_chain(&mut self, rule: Rule, children: &[ParseTree]) -> Result<Ast> {
        let (first, rest) = children.split_first().ok_or_else(|| malformed(rule, children))?;
        let mut ast = self.build(first)?;

        for pair in rest.chunks(2) {
            let [operator, operand] = pair else { return Err(malformed(rule, children)) };
            let lexeme = terminal(operator).ok_or_else(|| malformed(rule, children))?;
            let op = BinaryOp::from_symbol(lexeme.token.text()).ok_or_else(|| unexpected(lexeme))?;
            let right = self.build(operand)?;
            ast = self.dyadic(op, ast, right)?;
        }
        Ok(ast)
    }

    fn dyadic(&mut self, op: BinaryOp, left: Ast, right: Ast) -> Result<Ast> {
        let ast = Ast::Binary { op, left: Box::new(left), right: Box::new(right) };
        match &ast {
            Ast::Binary { left, right, .. } if left.literal().is_some() && right.literal().is_some() => {
                Ok(Ast::Literal(self.interpreter.fold(&ast)?))
            }
            _ => Ok(ast),
        }
    }

    fn monadic(&mut self, op: UnaryOp, operand: Ast) -> Result<Ast> {
        let folds = operand.literal().is_some();
        let ast = Ast::Unary { op, operand: Box::new(operand) };
        if folds {
            return Ok(Ast::Literal(self.interpreter.fold(&ast)?));
        }
        Ok(ast)
    }

    fn build_binding(&mut self, children: &[ParseTree]) -> Result<Ast> {
        let [name, binder, value] = children else { return Err(malformed(Rule::Binding, children)) };
        let name = terminal(name).ok_or_else(|| malformed(Rule::Binding, children))?;
        let constant = terminal(binder).map(|lexeme| lexeme.token.is_keyword("IS")).unwrap_or(false);

        Ok(Ast::Binding {
            name: name.token.text().to_uppercase(),
            value: Box::new(self.build(value)?),
            constant,
        })
    }

    fn build_selection(&mut self, children: &[ParseTree]) -> Result<Ast> {
        let mut pairs = vec![];
        for pair in children.chunks(2) {
            match pair {
                [condition, consequent] => pairs.push((self.build(condition)?, self.build(consequent)?)),
                // Trailing else branch
                [alternative] => pairs.push((Ast::Literal(Operand::Boolean(true)), self.build(alternative)?)),
                _ => return Err(malformed(Rule::Selection, children)),
            }
        }
        Ok(Ast::Selection(pairs))
    }

    fn build_fundef(&mut self, rule: Rule, children: &[ParseTree]) -> Result<Ast> {
        let whole = children;
        let mut children = children;
        let mut help = None;
        let mut name = None;

        if rule == Rule::NamedFundef {
            if let Some((first, rest)) = children.split_first() {
                if let Some(Lexeme { token: Token::Doc(text), .. }) = terminal(first) {
                    help = Some(text.to_string());
                    children = rest;
                }
            }
            let (first, rest) = children.split_first().ok_or_else(|| malformed(rule, whole))?;
            let lexeme = terminal(first).ok_or_else(|| malformed(rule, whole))?;
            name = Some(lexeme.token.text().to_uppercase());
            children = rest;
        }

        let (body, signature) = children.split_last().ok_or_else(|| malformed(rule, whole))?;
        let mut parameters = vec![];
        let mut return_type = None;
        for part in signature {
            match part {
                ParseTree::Rule { rule: Rule::Formal, children } => {
                    let [name, kind] = children.as_slice() else { return Err(malformed(Rule::Formal, children)) };
                    parameters.push(Parameter {
                        name: terminal(name).ok_or_else(|| malformed(Rule::Formal, children))?.token.text().to_uppercase(),
                        kind: self.build_type(kind)?,
                    });
                }
                ParseTree::Rule { rule: Rule::ReturnType, children } => {
                    let kind = children.first().ok_or_else(|| malformed(Rule::ReturnType, children))?;
                    return_type = Some(self.build_type(kind)?);
                }
                _ => return Err(malformed(rule, whole)),
            }
        }

        Ok(Ast::FunctionDef(Rc::new(FunctionDef {
            name,
            parameters,
            return_type,
            body: Rc::new(self.build(body)?),
            help,
        })))
    }

    fn build_type(&mut self, tree: &ParseTree) -> Result<Type> {
        let lexeme = terminal(tree).ok_or_else(|| malformed(Rule::Formal, std::slice::from_ref(tree)))?;
        Type::from_name(lexeme.token.text()).ok_or_else(|| unexpected(lexeme))
    }

    fn build_funcall(&mut self, children: &[ParseTree]) -> Result<Ast> {
        let (function, arguments) = children.split_first().ok_or_else(|| malformed(Rule::Funcall, children))?;
        let function = match terminal(function) {
            Some(Lexeme { token: Token::Identifier(name), .. }) => {
                Ast::Symbol { name: name.to_uppercase(), role: SymbolRole::Function }
            }
            _ => self.build(function)?,
        };

        Ok(Ast::Call { function: Box::new(function), arguments: self.build_all(arguments)? })
    }
}
