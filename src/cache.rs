use std::{collections::HashMap, rc::Rc};

use regex::Regex;

use crate::{
    ast::Ast,
    error::{Result, VelaError},
    operand::Operand,
    parser::Production,
};

/// A production together with the canonical text of its token stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    production: Production,
    text: String,
}

impl CacheKey {
    pub fn new(production: Production, text: String) -> Self {
        Self { production, text }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub ast_hits: usize,
    pub ast_misses: usize,
    pub result_hits: usize,
    pub patterns: usize,
}

/// Per-interpreter memo of built trees, results of trees that can't depend
/// on anything but themselves, and compiled `=~` patterns
#[derive(Default)]
pub struct ExpressionCache {
    asts: HashMap<CacheKey, Rc<Ast>>,
    results: HashMap<CacheKey, Operand>,
    patterns: HashMap<String, Regex>,
    stats: CacheStats,
}

impl ExpressionCache {
    pub fn ast(&mut self, key: &CacheKey) -> Option<Rc<Ast>> {
        let ast = self.asts.get(key).cloned();
        match ast {
            Some(_) => self.stats.ast_hits += 1,
            None => self.stats.ast_misses += 1,
        }
        ast
    }

    pub fn insert_ast(&mut self, key: CacheKey, ast: Rc<Ast>) {
        self.asts.insert(key, ast);
    }

    pub fn result(&mut self, key: &CacheKey) -> Option<Operand> {
        let result = self.results.get(key).cloned();
        if result.is_some() {
            self.stats.result_hits += 1;
        }
        result
    }

    pub fn insert_result(&mut self, key: CacheKey, result: Operand) {
        self.results.insert(key, result);
    }

    /// Compiled form of a pattern, anchored so that it must match the whole
    /// subject
    pub fn pattern(&mut self, pattern: &str) -> Result<&Regex> {
        if !self.patterns.contains_key(pattern) {
            let regex = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|err| VelaError::eval(format!("invalid pattern \"{}\": {}", pattern, err)))?;
            self.patterns.insert(pattern.to_owned(), regex);
            self.stats.patterns = self.patterns.len();
        }
        self.patterns.get(pattern)
            .ok_or_else(|| VelaError::eval(format!("pattern \"{}\" missing from the cache", pattern)))
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.asts.clear();
        self.results.clear();
        self.patterns.clear();
        self.stats = CacheStats::default();
    }
}
