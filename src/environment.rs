use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::Rc,
};

use crate::{
    error::{Result, VelaError},
    function::FunctionDescriptor,
    operand::Operand,
};

/// Variable lookup supplied by the embedding host, e.g. the fields of the
/// record a filter is being applied to. Names arrive upper-cased.
pub trait Environment {
    fn lookup(&self, name: &str) -> Option<Operand>;
}

/// One level of bindings: variables, constants and function overloads
#[derive(Default, Clone)]
pub struct Scope {
    variables: HashMap<String, Operand>,
    constants: HashSet<String>,
    functions: HashMap<String, Vec<Rc<FunctionDescriptor>>>,
}

pub type ScopeRef = Rc<RefCell<Scope>>;

impl Scope {
    pub fn shared() -> ScopeRef {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn lookup(&self, name: &str) -> Option<Operand> {
        self.variables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constants.contains(name)
    }

    pub fn bind(&mut self, name: &str, value: Operand, constant: bool) -> Result<()> {
        if self.constants.contains(name) {
            return Err(VelaError::eval(format!("'{}' is a constant binding in this environment", name)));
        }
        if constant && self.variables.contains_key(name) {
            return Err(VelaError::eval(format!("'{}' is already bound in this environment", name)));
        }

        self.variables.insert(name.to_owned(), value);
        if constant {
            self.constants.insert(name.to_owned());
        }
        Ok(())
    }

    pub fn functions(&self, name: &str) -> Option<&[Rc<FunctionDescriptor>]> {
        self.functions.get(name).map(Vec::as_slice)
    }

    /// Adds an overload. One with the same parameter types is replaced.
    pub fn add_function(&mut self, name: &str, function: Rc<FunctionDescriptor>) {
        let overloads = self.functions.entry(name.to_owned()).or_default();
        match overloads.iter_mut().find(|existing| existing.formals == function.formals) {
            Some(existing) => *existing = function,
            None => overloads.push(function),
        }
    }

    pub fn function_names(&self) -> impl Iterator<Item = &String> {
        self.functions.keys()
    }

    /// Copies every binding of `other` into this scope, later scopes winning
    pub fn absorb(&mut self, other: &Scope) {
        for (name, value) in &other.variables {
            self.variables.insert(name.clone(), value.clone());
            if other.constants.contains(name) {
                self.constants.insert(name.clone());
            } else {
                self.constants.remove(name);
            }
        }
        for (name, overloads) in &other.functions {
            for function in overloads {
                self.add_function(name, function.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.functions.is_empty()
    }

    pub fn clear(&mut self) {
        self.variables.clear();
        self.constants.clear();
        self.functions.clear();
    }
}

/// An entry of the interpreter's frame stack
#[derive(Clone)]
pub enum Frame {
    Scope(ScopeRef),
    Host(Rc<dyn Environment>),
}

/// Host environment backed by a map, with case-insensitive names and
/// aliases resolving several external names to one canonical name
#[derive(Default, Clone)]
pub struct MapEnvironment {
    values: HashMap<String, Operand>,
    aliases: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Operand>) {
        self.values.insert(name.to_uppercase(), value.into());
    }

    pub fn with(mut self, name: &str, value: impl Into<Operand>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn alias(&mut self, alias: &str, canonical: &str) {
        self.aliases.insert(alias.to_uppercase(), canonical.to_uppercase());
    }
}

impl Environment for MapEnvironment {
    fn lookup(&self, name: &str) -> Option<Operand> {
        let name = name.to_uppercase();
        let canonical = self.aliases.get(&name).unwrap_or(&name);
        self.values.get(canonical).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_cannot_be_rebound() {
        let mut scope = Scope::default();
        scope.bind("X", Operand::from(12), true).unwrap();
        assert!(scope.bind("X", Operand::from(13), false).is_err());
        assert!(scope.bind("X", Operand::from(13), true).is_err());
        assert_eq!(scope.lookup("X"), Some(Operand::from(12)));
    }

    #[test]
    fn variables_can_be_rebound() {
        let mut scope = Scope::default();
        scope.bind("X", Operand::from(12), false).unwrap();
        scope.bind("X", Operand::from(13), false).unwrap();
        assert_eq!(scope.lookup("X"), Some(Operand::from(13)));
        assert!(scope.bind("X", Operand::from(14), true).is_err());
    }

    #[test]
    fn absorbing_keeps_constness() {
        let mut outer = Scope::default();
        outer.bind("A", Operand::from(1), true).unwrap();
        let mut inner = Scope::default();
        inner.bind("B", Operand::from(2), false).unwrap();

        let mut captured = Scope::default();
        captured.absorb(&outer);
        captured.absorb(&inner);
        assert!(captured.is_constant("A"));
        assert!(!captured.is_constant("B"));
        assert!(!captured.is_empty());
    }

    #[test]
    fn map_environment_aliases() {
        let mut environment = MapEnvironment::new().with("magnitude", 4.5).with("band", "Johnson V");
        environment.alias("mag", "magnitude");

        assert_eq!(environment.lookup("MAG"), Some(Operand::from(4.5)));
        assert_eq!(environment.lookup("Band"), Some(Operand::from("Johnson V")));
        assert_eq!(environment.lookup("uncertainty"), None);
    }
}
