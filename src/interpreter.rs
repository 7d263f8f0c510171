use std::{
    cell::RefCell,
    fs,
    io::{self, Write},
    path::Path,
    rc::Rc,
};

use itertools::Itertools;
use tracing::{debug, info, trace, warn};

use crate::{
    ast::{Ast, FunctionDef, SymbolRole},
    builder::AstBuilder,
    builtin,
    cache::{CacheKey, CacheStats, ExpressionCache},
    config::InterpreterConfig,
    environment::{Environment, Frame, Scope, ScopeRef},
    error::{Result, VelaError},
    function::{Formals, FunctionBody, FunctionDescriptor, HostMethod, UserFunction},
    lexer::{canonical, lexer},
    operand::{Operand, Type},
    parser::{parse, Production},
    stdlib,
};

/// Grows the native stack on demand so deeply nested trees and non-tail
/// recursion don't overflow it
#[inline]
fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    const RED_ZONE: usize = 100 * 1024;
    const STACK_PER_RECURSION: usize = 1024 * 1024;

    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

// How the evaluation of a function body ended
enum Tail {
    Done,
    // Call to the running function itself, with these arguments
    Call(Vec<Operand>),
}

// What a bare name resolves to
enum Callee {
    Overloads(Vec<Rc<FunctionDescriptor>>),
    Value(Operand),
}

fn invalid_parameters(name: &str, candidates: &[Rc<FunctionDescriptor>], arguments: &[Operand]) -> VelaError {
    VelaError::eval(format!(
        "Invalid parameters for function \"{}\" ({}), expected one of:\n{}",
        name,
        arguments.iter().map(Operand::type_of).join(", "),
        candidates.iter().map(|candidate| format!("  {}", candidate)).join("\n")
    ))
}

/// A VeLa interpreter: the operand stack, the frame stack (global scope at
/// the bottom), registered functions and the expression caches.
///
/// Each instance is independent and single-threaded.
pub struct Interpreter {
    pub(crate) config: InterpreterConfig,
    stack: Vec<Operand>,
    frames: Vec<Frame>,
    global: ScopeRef,
    // Index of the first frame owned by each running user function
    activations: Vec<usize>,
    pub(crate) cache: ExpressionCache,
    output: Box<dyn Write>,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Result<Self> {
        let global = Scope::shared();
        let mut interpreter = Self {
            config,
            stack: vec![],
            frames: vec![Frame::Scope(global.clone())],
            global,
            activations: vec![],
            cache: ExpressionCache::default(),
            output: Box::new(io::stdout()),
        };

        builtin::register_builtins(&mut interpreter)?;
        if interpreter.config.standard_library {
            stdlib::load(&mut interpreter)?;
        }
        interpreter.load_source_directories();

        Ok(interpreter)
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Where `print` and `println` write to, stdout unless replaced
    pub fn set_output(&mut self, output: Box<dyn Write>) {
        self.output = output;
    }

    pub(crate) fn write_output(&mut self, text: &str) -> Result<()> {
        self.output.write_all(text.as_bytes())
            .and_then(|_| self.output.flush())
            .map_err(|err| VelaError::eval(format!("writing output failed: {}", err)))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Evaluates a sequence of statements, returning the last value if any
    pub fn program(&mut self, source: &str) -> Result<Option<Operand>> {
        self.evaluate_production(source, Production::Sequence).map(|(result, _)| result)
    }

    /// Like [Interpreter::program], also handing back the tree that ran
    pub fn program_with_ast(&mut self, source: &str) -> Result<(Option<Operand>, Rc<Ast>)> {
        self.evaluate_production(source, Production::Sequence)
    }

    pub fn program_file(&mut self, path: impl AsRef<Path>) -> Result<Option<Operand>> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .map_err(|err| VelaError::eval(format!("{}: {}", path.display(), err)))?;
        self.program(&source)
    }

    pub fn boolean_expression(&mut self, source: &str) -> Result<bool> {
        match self.evaluate_production(source, Production::BooleanExpression)? {
            (Some(Operand::Boolean(value)), _) => Ok(value),
            (other, _) => Err(VelaError::eval(format!(
                "expected a BOOLEAN result, got {}",
                other.map(|value| value.type_of()).unwrap_or(Type::None)
            ))),
        }
    }

    pub fn real_expression(&mut self, source: &str) -> Result<f64> {
        let value = self.expression(source)?;
        value.as_real()
            .ok_or_else(|| VelaError::eval(format!("expected a REAL result, got {}", value.type_of())))
    }

    /// Evaluates an arithmetic expression
    pub fn expression(&mut self, source: &str) -> Result<Operand> {
        match self.evaluate_production(source, Production::NumericExpression)? {
            (Some(value), _) => Ok(value),
            (None, _) => Err(VelaError::eval(format!("'{}' has no value", source.trim()))),
        }
    }

    fn evaluate_production(&mut self, source: &str, production: Production) -> Result<(Option<Operand>, Rc<Ast>)> {
        let lexemes = lexer(source)?;
        let key = CacheKey::new(production, canonical(&lexemes));

        let ast = match self.cache.ast(&key) {
            Some(ast) => {
                debug!(?production, "expression cache hit");
                ast
            }
            None => {
                debug!(?production, "expression cache miss");
                let tree = parse(&lexemes, production)?;
                let ast = Rc::new(AstBuilder::new(self).build(&tree)?);
                self.cache.insert_ast(key.clone(), ast.clone());
                ast
            }
        };

        if self.config.verbose {
            info!(ast = %ast.to_sexpr(), "evaluating");
        }

        if let Some(result) = self.cache.result(&key) {
            if self.config.verbose {
                info!(result = ?result, "result cache hit");
            } else {
                debug!(result = ?result, "result cache hit");
            }
            return Ok((Some(result), ast));
        }

        let result = self.run(&ast)?;
        if let Some(value) = &result {
            if ast.is_deterministic() {
                self.cache.insert_result(key, value.clone());
            }
        }
        Ok((result, ast))
    }

    // Evaluates a whole tree. On failure the operand and frame stacks are put
    // back the way they were.
    fn run(&mut self, ast: &Ast) -> Result<Option<Operand>> {
        let height = self.stack.len();
        let depth = self.frames.len();
        let activations = self.activations.len();

        if let Err(error) = self.eval(ast) {
            self.stack.truncate(height);
            self.frames.truncate(depth);
            self.activations.truncate(activations);
            return Err(error);
        }

        let result = if self.stack.len() > height { self.stack.pop() } else { None };
        self.stack.truncate(height);
        Ok(result)
    }

    /// Evaluates a tree made of operators and literals only
    pub(crate) fn fold(&mut self, ast: &Ast) -> Result<Operand> {
        let height = self.stack.len();
        let result = self.evaluate_value(ast);
        self.stack.truncate(height);
        result
    }

    pub(crate) fn eval(&mut self, ast: &Ast) -> Result<()> {
        ensure_sufficient_stack(|| self.eval_node(ast))
    }

    fn eval_node(&mut self, ast: &Ast) -> Result<()> {
        match ast {
            Ast::Literal(operand) => self.stack.push(operand.clone()),
            Ast::Symbol { name, .. } => self.evaluate_symbol(name)?,
            Ast::Binary { op, left, right } => {
                // Both operands land on the stack in source order
                let mut operands = self.evaluate_operands([left.as_ref(), right.as_ref()])?;
                let right = operands.pop().ok_or_else(|| VelaError::eval("missing right operand"))?;
                let left = operands.pop().ok_or_else(|| VelaError::eval("missing left operand"))?;
                let result = self.apply_binary(*op, left, right)?;
                self.stack.push(result);
            }
            Ast::Unary { op, operand } => {
                let operand = self.evaluate_value(operand)?;
                let result = self.apply_unary(*op, operand)?;
                self.stack.push(result);
            }
            Ast::Sequence(children) => {
                // Only the value of the last child survives
                let height = self.stack.len();
                for child in children {
                    self.stack.truncate(height);
                    self.eval(child)?;
                }
            }
            Ast::Binding { name, value, constant } => {
                let height = self.stack.len();
                self.eval(value)?;
                if self.stack.len() <= height {
                    return Err(VelaError::eval(format!("no value to bind to \"{}\"", name)));
                }
                let value = self.stack.split_off(height).pop().unwrap_or(Operand::None);
                self.bind_name(name, value, *constant)?;
            }
            Ast::Selection(pairs) => {
                for (condition, consequent) in pairs {
                    if self.evaluate_condition(condition)? {
                        self.eval(consequent)?;
                        break;
                    }
                }
            }
            Ast::While { condition, body } => {
                let height = self.stack.len();
                while self.evaluate_condition(condition)? {
                    self.eval(body)?;
                    self.stack.truncate(height);
                }
            }
            Ast::FunctionDef(definition) => {
                let function = Rc::new(self.define(definition));
                match &definition.name {
                    Some(name) => self.innermost_scope().borrow_mut().add_function(name, function),
                    None => self.stack.push(Operand::Function(function)),
                }
            }
            Ast::Call { function, arguments } => {
                let result = match function.as_ref() {
                    Ast::Symbol { name, role: SymbolRole::Function } => {
                        let arguments = self.evaluate_operands(arguments)?;
                        let target = self.resolve_call(name, &arguments)?;
                        self.call(&target, arguments)?
                    }
                    callee => {
                        let callee = self.evaluate_value(callee)?;
                        let arguments = self.evaluate_operands(arguments)?;
                        self.apply(&callee, arguments)?
                    }
                };
                self.stack.extend(result);
            }
            Ast::List(elements) => {
                let values = self.evaluate_operands(elements)?;
                self.stack.push(Operand::list(values));
            }
        }

        Ok(())
    }

    // Evaluates each node to exactly one value and takes the values off the
    // stack in source order
    fn evaluate_operands<'n>(&mut self, nodes: impl IntoIterator<Item = &'n Ast>) -> Result<Vec<Operand>> {
        let height = self.stack.len();
        for node in nodes {
            let before = self.stack.len();
            self.eval(node)?;
            if self.stack.len() != before + 1 {
                return Err(VelaError::eval(format!("{} has no value", node.to_sexpr())));
            }
        }
        Ok(self.stack.split_off(height))
    }

    fn evaluate_value(&mut self, node: &Ast) -> Result<Operand> {
        self.evaluate_operands([node])?
            .pop()
            .ok_or_else(|| VelaError::eval(format!("{} has no value", node.to_sexpr())))
    }

    fn evaluate_condition(&mut self, condition: &Ast) -> Result<bool> {
        match self.evaluate_value(condition)? {
            Operand::Boolean(value) => Ok(value),
            other => Err(VelaError::eval(format!(
                "condition {} is {}, expected BOOLEAN",
                condition.to_sexpr(),
                other.type_of()
            ))),
        }
    }

    fn evaluate_symbol(&mut self, name: &str) -> Result<()> {
        match self.resolve_symbol(name) {
            Some(Callee::Value(value)) => self.stack.push(value),
            Some(Callee::Overloads(overloads)) => {
                // A bare name calls a parameterless overload, otherwise it is a function value
                let parameterless = overloads.iter()
                    .find(|function| matches!(&function.formals, Formals::Fixed(types) if types.is_empty()))
                    .cloned();
                match parameterless {
                    Some(function) => {
                        let result = self.call(&function, vec![])?;
                        self.stack.extend(result);
                    }
                    None => self.stack.extend(overloads.first().cloned().map(Operand::Function)),
                }
            }
            None => return Err(VelaError::eval(format!("unknown variable \"{}\"", name))),
        }
        Ok(())
    }

    // A bare name: the nearest frame binding it as a value or a function wins
    fn resolve_symbol(&self, name: &str) -> Option<Callee> {
        for frame in self.frames.iter().rev() {
            match frame {
                Frame::Scope(scope) => {
                    let scope = scope.borrow();
                    if let Some(value) = scope.lookup(name) {
                        return Some(Callee::Value(value));
                    }
                    if let Some(overloads) = scope.functions(name) {
                        return Some(Callee::Overloads(overloads.to_vec()));
                    }
                }
                Frame::Host(environment) => {
                    if let Some(value) = environment.lookup(name) {
                        return Some(Callee::Value(value));
                    }
                }
            }
        }
        None
    }

    fn find_overloads(&self, name: &str) -> Option<Vec<Rc<FunctionDescriptor>>> {
        self.frames.iter().rev().find_map(|frame| match frame {
            Frame::Scope(scope) => {
                let overloads = scope.borrow().functions(name).map(<[_]>::to_vec);
                overloads
            }
            Frame::Host(_) => None,
        })
    }

    // In call position functions come first: the nearest scope defining
    // `name` decides, then the first overload accepting the arguments wins.
    // A variable holding a function is called only when no function has
    // that name.
    fn resolve_call(&self, name: &str, arguments: &[Operand]) -> Result<Rc<FunctionDescriptor>> {
        let candidates = match self.find_overloads(name) {
            Some(overloads) => overloads,
            None => match self.lookup(name) {
                Some(Operand::Function(function)) => vec![function],
                Some(other) => {
                    return Err(VelaError::eval(format!("\"{}\" is {}, not a function", name, other.type_of())))
                }
                None => return Err(VelaError::eval(format!("Unknown function \"{}\"", name))),
            },
        };

        let found = candidates.iter().find(|candidate| candidate.conforms(arguments)).cloned();
        found.ok_or_else(|| invalid_parameters(name, &candidates, arguments))
    }

    /// Calls a function value, e.g. one passed to a native as an argument
    pub fn apply(&mut self, function: &Operand, arguments: Vec<Operand>) -> Result<Option<Operand>> {
        let Operand::Function(descriptor) = function else {
            return Err(VelaError::eval(format!("{} is not a function", function.repr(self.config.precision))));
        };
        if !descriptor.conforms(&arguments) {
            return Err(invalid_parameters(descriptor.display_name(), &[descriptor.clone()], &arguments));
        }
        self.call(descriptor, arguments)
    }

    // Invokes a function whose parameters the arguments conform to
    pub(crate) fn call(&mut self, function: &Rc<FunctionDescriptor>, arguments: Vec<Operand>) -> Result<Option<Operand>> {
        trace!(function = %function, arguments = arguments.len(), "call");

        let arguments = function.coerce(arguments, self.config.precision);
        let result = match &function.body {
            FunctionBody::Native(native) => (**native)(self, arguments)?,
            FunctionBody::Host(method) => method.invoke(arguments, function.return_type)?,
            FunctionBody::User(user) => self.call_user(function, user, arguments)?,
        };
        function.check_result(result, self.config.precision)
    }

    fn call_user(&mut self, function: &Rc<FunctionDescriptor>, user: &UserFunction, arguments: Vec<Operand>) -> Result<Option<Operand>> {
        let depth = self.frames.len();
        let height = self.stack.len();

        self.activations.push(depth);
        if !user.captured.borrow().is_empty() {
            self.frames.push(Frame::Scope(user.captured.clone()));
        }
        let activation = Scope::shared();
        self.frames.push(Frame::Scope(activation.clone()));

        let outcome = self.run_body(function, user, &activation, arguments);

        self.frames.truncate(depth);
        self.activations.pop();
        if let Err(error) = outcome {
            self.stack.truncate(height);
            return Err(error);
        }

        let result = if self.stack.len() > height { self.stack.pop() } else { None };
        self.stack.truncate(height);
        Ok(result)
    }

    // Runs the body, looping in place for as long as it ends by calling itself
    fn run_body(
        &mut self,
        function: &Rc<FunctionDescriptor>,
        user: &UserFunction,
        activation: &ScopeRef,
        mut arguments: Vec<Operand>,
    ) -> Result<()> {
        let height = self.stack.len();
        loop {
            {
                let mut scope = activation.borrow_mut();
                scope.clear();
                for (name, value) in user.parameters.iter().zip(arguments) {
                    scope.bind(name, value, false)?;
                }
            }
            self.stack.truncate(height);

            match self.evaluate_tail(&user.body, function)? {
                Tail::Call(next) => arguments = next,
                Tail::Done => return Ok(()),
            }
        }
    }

    // Evaluates a node in tail position of `function`'s body. A self call
    // found there is handed back instead of being made.
    fn evaluate_tail(&mut self, ast: &Ast, function: &Rc<FunctionDescriptor>) -> Result<Tail> {
        match ast {
            Ast::Sequence(children) => {
                let Some((last, init)) = children.split_last() else { return Ok(Tail::Done) };
                let height = self.stack.len();
                for child in init {
                    self.stack.truncate(height);
                    self.eval(child)?;
                }
                self.stack.truncate(height);
                self.evaluate_tail(last, function)
            }
            Ast::Selection(pairs) => {
                for (condition, consequent) in pairs {
                    if self.evaluate_condition(condition)? {
                        return self.evaluate_tail(consequent, function);
                    }
                }
                Ok(Tail::Done)
            }
            Ast::Call { function: callee, arguments } => match callee.as_ref() {
                Ast::Symbol { name, role: SymbolRole::Function } if function.name.as_deref() == Some(name.as_str()) => {
                    let arguments = self.evaluate_operands(arguments)?;
                    let target = self.resolve_call(name, &arguments)?;
                    if Rc::ptr_eq(&target, function) {
                        return Ok(Tail::Call(target.coerce(arguments, self.config.precision)));
                    }
                    let result = self.call(&target, arguments)?;
                    self.stack.extend(result);
                    Ok(Tail::Done)
                }
                _ => self.eval(ast).map(|_| Tail::Done),
            },
            _ => self.eval(ast).map(|_| Tail::Done),
        }
    }

    // Builds a function value. It captures the scopes of the function being
    // run, merged into one.
    fn define(&self, definition: &FunctionDef) -> FunctionDescriptor {
        let start = self.activations.last().copied().unwrap_or(1).max(1);
        let mut captured = Scope::default();
        for frame in &self.frames[start..] {
            if let Frame::Scope(scope) = frame {
                captured.absorb(&scope.borrow());
            }
        }

        FunctionDescriptor {
            name: definition.name.clone(),
            formals: Formals::Fixed(definition.parameters.iter().map(|parameter| parameter.kind).collect()),
            return_type: definition.return_type,
            help: definition.help.clone(),
            body: FunctionBody::User(UserFunction {
                parameters: definition.parameters.iter().map(|parameter| parameter.name.clone()).collect(),
                body: definition.body.clone(),
                captured: Rc::new(RefCell::new(captured)),
            }),
        }
    }

    fn innermost_scope(&self) -> ScopeRef {
        self.frames.iter()
            .rev()
            .find_map(|frame| match frame {
                Frame::Scope(scope) => Some(scope.clone()),
                Frame::Host(_) => None,
            })
            .unwrap_or_else(|| self.global.clone())
    }

    /// Looks a variable up through every frame, innermost first
    pub fn lookup(&self, name: &str) -> Option<Operand> {
        let name = name.to_uppercase();
        self.frames.iter().rev().find_map(|frame| match frame {
            Frame::Scope(scope) => scope.borrow().lookup(&name),
            Frame::Host(environment) => environment.lookup(&name),
        })
    }

    /// Binds a name the way `<-` (or `is`, for a constant) does
    pub fn bind(&mut self, name: &str, value: Operand, constant: bool) -> Result<()> {
        self.bind_name(&name.to_uppercase(), value, constant)
    }

    // A constant goes to the innermost scope. A variable updates the nearest
    // existing variable of the running function or of the global scope, which
    // keeps its type, and is created in the innermost scope otherwise.
    fn bind_name(&mut self, name: &str, value: Operand, constant: bool) -> Result<()> {
        let innermost = self.innermost_scope();
        if constant {
            return innermost.borrow_mut().bind(name, value, true);
        }

        // The running function's scopes, then the global scope. Callers'
        // locals are never rebound.
        let start = self.activations.last().copied().unwrap_or(0);
        let function_scopes = self.frames[start..].iter().rev().filter_map(|frame| match frame {
            Frame::Scope(scope) => Some(scope),
            Frame::Host(_) => None,
        });
        let global = (start > 0).then_some(&self.global);
        for scope in function_scopes.chain(global) {
            let mut scope_ref = scope.borrow_mut();
            if !scope_ref.contains(name) {
                continue;
            }
            if scope_ref.is_constant(name) {
                if Rc::ptr_eq(scope, &innermost) {
                    return scope_ref.bind(name, value, false);
                }
                // Constants of enclosing scopes are shadowed
                break;
            }

            let existing = scope_ref.lookup(name).map(|current| current.type_of()).unwrap_or(Type::Any);
            let converted = value.convert(existing, self.config.precision).ok_or_else(|| {
                VelaError::eval(format!("\"{}\" holds {}, it can't be rebound to {}", name, existing, value.type_of()))
            })?;
            return scope_ref.bind(name, converted, false);
        }

        let bound = innermost.borrow_mut().bind(name, value, false);
        bound
    }

    /// Pushes a read-only host environment. Its names are visible until it
    /// is popped.
    pub fn push_environment(&mut self, environment: Rc<dyn Environment>) {
        self.frames.push(Frame::Host(environment));
    }

    /// Pops the innermost frame if it is a host environment
    pub fn pop_environment(&mut self) -> Option<Rc<dyn Environment>> {
        if !matches!(self.frames.last(), Some(Frame::Host(_))) {
            return None;
        }
        match self.frames.pop() {
            Some(Frame::Host(environment)) => Some(environment),
            _ => None,
        }
    }

    pub fn with_environment<T>(&mut self, environment: Rc<dyn Environment>, f: impl FnOnce(&mut Self) -> T) -> T {
        self.push_environment(environment);
        let result = f(self);
        self.pop_environment();
        result
    }

    /// Adds a function overload to the global scope
    pub fn register(&mut self, function: FunctionDescriptor) {
        let name = function.display_name().to_uppercase();
        self.global.borrow_mut().add_function(&name, Rc::new(function));
    }

    pub fn register_native(
        &mut self,
        name: &str,
        parameter_types: Vec<Type>,
        return_type: Option<Type>,
        body: impl Fn(&mut Interpreter, Vec<Operand>) -> Result<Option<Operand>> + 'static,
    ) {
        self.register(FunctionDescriptor::native(name, parameter_types, return_type, body));
    }

    pub fn register_host_method(
        &mut self,
        name: &str,
        parameter_types: Vec<Type>,
        return_type: Option<Type>,
        method: HostMethod,
    ) {
        self.register(FunctionDescriptor::host(name, parameter_types, return_type, method));
    }

    /// Binds a constant in the global scope
    pub fn define_constant(&mut self, name: &str, value: Operand) -> Result<()> {
        self.global.borrow_mut().bind(&name.to_uppercase(), value, true)
    }

    /// Names of every function in the global scope, sorted
    pub fn function_names(&self) -> Vec<String> {
        self.global.borrow().function_names().cloned().sorted().collect()
    }

    fn load_source_directories(&mut self) {
        for directory in self.config.source_directories.clone() {
            let entries = match fs::read_dir(&directory) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(directory = %directory.display(), error = %err, "can't read VeLa source directory");
                    continue;
                }
            };

            let paths = entries.filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| matches!(path.extension().and_then(|extension| extension.to_str()), Some("vl" | "vela")))
                .sorted();

            for path in paths {
                match self.program_file(&path) {
                    Ok(_) => debug!(path = %path.display(), "loaded VeLa source"),
                    Err(err) => warn!(path = %path.display(), error = %err, "failed to load VeLa source"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use anyhow::bail;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        environment::MapEnvironment,
        function::{HostValue, Receiver},
        operand::HostObject,
        test_utils::{all_testcases, load_test_pair, output_matches, SharedBuffer},
    };

    fn vela() -> Interpreter {
        Interpreter::new(InterpreterConfig::default()).unwrap()
    }

    fn capture(interpreter: &mut Interpreter) -> SharedBuffer {
        let buffer = SharedBuffer::default();
        interpreter.set_output(Box::new(buffer.clone()));
        buffer
    }

    #[test]
    fn evaluate_testcases() -> anyhow::Result<()> {
        for testcase in all_testcases() {
            println!("Running testcase {}", testcase);
            let entries = load_test_pair(testcase)?;
            let mut interpreter = vela();
            let _ = capture(&mut interpreter);

            for (lineno, (input, expected)) in entries.into_iter().enumerate() {
                let expected: std::result::Result<_, _> = expected.into();
                let result = interpreter.program(&input);

                match (&result, &expected) {
                    (Ok(value), Ok(output)) if output_matches(output, value.as_ref()) => {}
                    (Err(error), Err(kind)) if error.kind() == kind.as_str() => {}
                    _ => bail!(
                        "Testcase {}:{} - `{}` gave {:?}, expected {:?}",
                        testcase,
                        lineno + 1,
                        input,
                        result,
                        expected
                    ),
                }
            }
        }

        Ok(())
    }

    #[test]
    fn print_writes_to_the_output() {
        let mut interpreter = vela();
        let output = capture(&mut interpreter);
        interpreter.program("print(\"x = \" 2.5 \" \") println([1 \"a\"]) println()").unwrap();
        assert_eq!(output.contents(), "x = 2.5 [1 \"a\"]\n\n");
    }

    #[test]
    fn closures_keep_their_state() {
        let mut interpreter = vela();
        interpreter.program("
            mkcounter(start:integer) : function {
                count <- start
                function(n:integer) : integer { count <- count + n count }
            }
            counter <- mkcounter(10)
        ").unwrap();

        assert_eq!(interpreter.program("counter(1)").unwrap(), Some(Operand::from(11)));
        assert_eq!(interpreter.program("counter(5)").unwrap(), Some(Operand::from(16)));

        // A second counter has its own state
        interpreter.program("other <- mkcounter(0)").unwrap();
        assert_eq!(interpreter.program("other(2)").unwrap(), Some(Operand::from(2)));
        assert_eq!(interpreter.program("counter(1)").unwrap(), Some(Operand::from(17)));
    }

    #[test]
    fn y_combinator() {
        let mut interpreter = vela();
        let result = interpreter.program("
            fact is function(f:function) : function {
                function(n:integer) : integer { if n <= 1 then 1 else n * f(n - 1) }
            }
            fix(g:function) : function {
                function(n:integer) : integer { (g(fix(g)))(n) }
            }
            (fix(fact))(10)
        ");
        assert_eq!(result.unwrap(), Some(Operand::from(3628800)));
    }

    #[test]
    fn overloads_are_chosen_by_type() {
        let mut interpreter = vela();
        interpreter.program("
            describe(n:integer) : string { \"integer\" }
            describe(s:string) : string { \"string\" }
            describe(x:real) : string { \"real\" }
        ").unwrap();

        assert_eq!(interpreter.program("describe(1)").unwrap(), Some(Operand::from("integer")));
        assert_eq!(interpreter.program("describe(\"1\")").unwrap(), Some(Operand::from("string")));
        // Strings accept any scalar, so the earlier overload wins for reals
        assert_eq!(interpreter.program("describe(1.5)").unwrap(), Some(Operand::from("string")));

        let error = interpreter.program("describe([1])").unwrap_err();
        assert!(error.to_string().starts_with("Invalid parameters for function \"DESCRIBE\""));

        // Redefining an overload replaces it
        interpreter.program("describe(n:integer) : string { \"whole\" }").unwrap();
        assert_eq!(interpreter.program("describe(2)").unwrap(), Some(Operand::from("whole")));
    }

    #[test]
    fn functions_win_over_variables_in_call_position() {
        let mut interpreter = vela();
        interpreter.program("max <- 10").unwrap();
        assert_eq!(interpreter.program("max(1 2)").unwrap(), Some(Operand::from(2)));
        assert_eq!(interpreter.program("max").unwrap(), Some(Operand::from(10)));

        interpreter.program("f(length:integer) : integer { length([1 2 3]) + length }").unwrap();
        assert_eq!(interpreter.program("f(4)").unwrap(), Some(Operand::from(7)));

        // With no function of that name, a variable holding one is called
        interpreter.program("double <- λ(n:integer) : integer { n * 2 }").unwrap();
        assert_eq!(interpreter.program("double(4)").unwrap(), Some(Operand::from(8)));

        let error = interpreter.program("max2 <- 1 max2(3)").unwrap_err();
        assert_eq!(error, VelaError::eval("\"MAX2\" is INTEGER, not a function"));
    }

    #[test]
    fn calls_are_evaluated_every_time() {
        let mut interpreter = vela();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        interpreter.register_native("tick", vec![], Some(Type::Integer), move |_, _| {
            counter.set(counter.get() + 1);
            Ok(Some(Operand::Integer(counter.get())))
        });

        let hits = interpreter.cache_stats().result_hits;
        assert_eq!(interpreter.program("tick() + 1").unwrap(), Some(Operand::from(2)));
        assert_eq!(interpreter.program("tick() + 1").unwrap(), Some(Operand::from(3)));
        assert_eq!(calls.get(), 2);
        assert_eq!(interpreter.cache_stats().result_hits, hits);
    }

    #[test]
    fn selection_evaluates_one_consequent() {
        let mut interpreter = vela();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        interpreter.register_native("touch", vec![Type::Integer], Some(Type::Integer), move |_, arguments| {
            counter.set(counter.get() + 1);
            Ok(arguments.into_iter().next())
        });

        let result = interpreter.program("when 1 > 2 -> touch(1) 2 > 1 -> touch(2) true -> touch(3)");
        assert_eq!(result.unwrap(), Some(Operand::from(2)));
        assert_eq!(calls.get(), 1);

        assert_eq!(interpreter.program("if false then touch(1)").unwrap(), None);
        assert_eq!(calls.get(), 1);

        assert!(interpreter.program("if 1 then 2").is_err());
    }

    #[test]
    fn deterministic_results_are_cached() {
        let mut interpreter = vela();
        interpreter.program("2 ^ 10 * 3").unwrap();
        interpreter.program("2^10*3   # again").unwrap();
        let stats = interpreter.cache_stats();
        assert_eq!(stats.result_hits, 1);
        assert!(stats.ast_hits >= 1);

        // Anything that reads a binding is evaluated every time
        interpreter.program("x <- 1").unwrap();
        assert_eq!(interpreter.program("x + 1").unwrap(), Some(Operand::from(2)));
        interpreter.program("x <- 5").unwrap();
        assert_eq!(interpreter.program("x + 1").unwrap(), Some(Operand::from(6)));
    }

    #[test]
    fn string_case_is_part_of_the_cache_key() {
        let mut interpreter = vela();
        assert_eq!(interpreter.program("\"abc\" + 1").unwrap(), Some(Operand::from("abc1")));
        assert_eq!(interpreter.program("\"ABC\" + 1").unwrap(), Some(Operand::from("ABC1")));
    }

    #[test]
    fn constants_and_variables() {
        let mut interpreter = vela();
        interpreter.program("limit is 10").unwrap();
        assert!(interpreter.program("limit <- 11").is_err());
        assert!(interpreter.program("limit is 11").is_err());

        // A function may shadow a global constant
        interpreter.program("f(n:integer) : integer { limit <- n limit }").unwrap();
        assert_eq!(interpreter.program("f(3)").unwrap(), Some(Operand::from(3)));
        assert_eq!(interpreter.lookup("limit"), Some(Operand::from(10)));

        interpreter.program("x <- 1").unwrap();
        assert!(interpreter.program("x <- \"one\"").is_err());
        interpreter.program("r <- 1.5 r <- 2").unwrap();
        assert_eq!(interpreter.lookup("R"), Some(Operand::Real(2.0)));

        assert!(interpreter.program("y <- print(1)").is_err());
    }

    #[test]
    fn functions_rebind_globals_but_not_caller_locals() {
        let mut interpreter = vela();
        interpreter.program("
            total <- 0
            add(n:integer) { total <- total + n }
            outer() : integer { step <- 1 inner() step }
            inner() { step <- 99 }
        ").unwrap();

        interpreter.program("add(2) add(3)").unwrap();
        assert_eq!(interpreter.lookup("total"), Some(Operand::from(5)));

        interpreter.program("for_(λ(n:integer) { total <- total + n } [10 20])").unwrap();
        assert_eq!(interpreter.lookup("total"), Some(Operand::from(35)));

        assert_eq!(interpreter.program("outer()").unwrap(), Some(Operand::from(1)));
        assert_eq!(interpreter.lookup("step"), None);
    }

    #[test]
    fn errors_leave_the_interpreter_usable() {
        let mut interpreter = vela();
        interpreter.program("f(n:integer) : integer { n / 0 }").unwrap();
        assert_eq!(interpreter.program("1 + f(2)").unwrap_err(), VelaError::eval("2/0: division by zero error"));
        assert_eq!(interpreter.program("1 + 2").unwrap(), Some(Operand::from(3)));
        assert_eq!(interpreter.program("unknown + 1").unwrap_err().kind(), "EvalError");
        assert_eq!(interpreter.program("1 +").unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn host_environment_lookup() {
        let mut interpreter = vela();
        let mut star = MapEnvironment::new().with("magnitude", 4.5).with("band", "V");
        star.alias("mag", "magnitude");

        let bright = interpreter.with_environment(Rc::new(star), |interpreter| {
            interpreter.boolean_expression("mag < 5 and band in [\"V\" \"B\"]")
        });
        assert!(bright.unwrap());
        assert_eq!(interpreter.lookup("mag"), None);
        assert!(interpreter.pop_environment().is_none());
    }

    #[test]
    fn host_methods() {
        struct Counter {
            step: i64,
        }

        let mut interpreter = vela();
        let counter = HostObject::new("Counter", Counter { step: 3 });
        interpreter.register_host_method(
            "step",
            vec![Type::Integer],
            Some(Type::Integer),
            HostMethod::new("Counter.step", Receiver::Bound(counter), |receiver, arguments| {
                let Some(HostValue::Object(object)) = receiver else { return Err("no receiver".to_owned()) };
                let counter = object.downcast_ref::<Counter>().ok_or("not a counter")?;
                Ok(HostValue::Integer(arguments[0].as_integer()? + counter.step))
            }),
        );
        interpreter.register_host_method(
            "fail",
            vec![],
            Some(Type::Integer),
            HostMethod::new("fail", Receiver::Static, |_, _| Err("out of order".to_owned())),
        );

        assert_eq!(interpreter.program("step(4)").unwrap(), Some(Operand::from(7)));
        assert_eq!(interpreter.program("fail()").unwrap_err(), VelaError::eval("fail: out of order"));
        assert_eq!(interpreter.program("upper(\"abc\") + substring(\"hello\" 1 3)").unwrap(), Some(Operand::from("ABCel")));
    }

    #[test]
    fn numeric_and_boolean_entry_points() {
        let mut interpreter = vela();
        assert_eq!(interpreter.real_expression("3 * 2.5").unwrap(), 7.5);
        assert_eq!(interpreter.expression("7 / 2").unwrap(), Operand::from(3));
        assert!(interpreter.boolean_expression("not (1 > 2) xor false").unwrap());
        assert!(interpreter.boolean_expression("1 + 2").is_err());
        assert_eq!(interpreter.expression("x <- 2").unwrap_err().kind(), "ParseError");
    }

    #[test]
    fn self_tail_calls_run_in_constant_stack() {
        let mut interpreter = vela();
        interpreter.program("
            count(n:integer total:integer) : integer {
                if n = 0 then total else count(n - 1 total + 1)
            }
        ").unwrap();
        assert_eq!(interpreter.program("count(100000 0)").unwrap(), Some(Operand::from(100000)));

        let reversed = interpreter.program("head(reverse_rec(seq(1 2000 1)))").unwrap();
        assert_eq!(reversed, Some(Operand::from(2000)));
    }

    #[test]
    fn deep_non_tail_recursion() {
        let mut interpreter = vela();
        interpreter.program("sum(n:integer) : integer { if n = 0 then 0 else n + sum(n - 1) }").unwrap();
        assert_eq!(interpreter.program("sum(2000)").unwrap(), Some(Operand::from(2001000)));
    }

    #[test]
    fn bare_function_names() {
        let mut interpreter = vela();
        interpreter.program("seven() : integer { 7 } twice(f:function x:integer) : integer { f(f(x)) }").unwrap();
        assert_eq!(interpreter.program("seven + 1").unwrap(), Some(Operand::from(8)));

        interpreter.program("inc(n:integer) : integer { n + 1 }").unwrap();
        assert_eq!(interpreter.program("twice(inc 1)").unwrap(), Some(Operand::from(3)));
        assert_eq!(interpreter.program("map(inc [1 2])").unwrap(), Some(Operand::list(vec![Operand::from(2), Operand::from(3)])));
    }

    #[test]
    fn source_directories_are_loaded() {
        let directory = std::env::temp_dir().join(format!("vela-sources-{}", std::process::id()));
        fs::create_dir_all(&directory).unwrap();
        fs::write(directory.join("square.vela"), "square(n:integer) : integer { n * n }").unwrap();
        fs::write(directory.join("broken.vl"), "square(").unwrap();
        fs::write(directory.join("notes.txt"), "not vela").unwrap();

        let mut interpreter = Interpreter::new(InterpreterConfig {
            source_directories: vec![directory.clone()],
            ..Default::default()
        }).unwrap();
        assert_eq!(interpreter.program("square(12)").unwrap(), Some(Operand::from(144)));

        fs::remove_dir_all(directory).unwrap();
    }

    proptest! {
        #[test]
        fn folding_agrees_with_evaluation(a in -1000i64..1000, b in -1000i64..1000, c in 1i64..100) {
            let mut interpreter = vela();
            let folded = interpreter.program(&format!("{} * {} + {} / {}", a, b, a, c)).unwrap();
            interpreter.program(&format!("a <- {} b <- {} c <- {}", a, b, c)).unwrap();
            let evaluated = interpreter.program("a * b + a / c").unwrap();
            prop_assert_eq!(folded, evaluated);
        }

        #[test]
        fn reals_print_without_trailing_zeros(value in -1.0e6f64..1.0e6) {
            let text = Operand::Real(value).to_string();
            prop_assert!(!text.contains('.') || !text.ends_with('0'));
        }
    }
}
