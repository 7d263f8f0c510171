#![no_main]

use libfuzzer_sys::fuzz_target;
use vela::{lexer, parse, Production};

fuzz_target!(|source: &str| {
    if let Ok(lexemes) = lexer(source) {
        for production in [Production::Sequence, Production::BooleanExpression, Production::NumericExpression] {
            let _ = parse(&lexemes, production);
        }
    }
});
