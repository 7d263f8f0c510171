use tracing::debug;

use crate::{error::Result, interpreter::Interpreter};

const STANDARD_LIBRARY: &str = include_str!("stdlib.vela");

/// Evaluates the standard library into the interpreter's global scope
pub(crate) fn load(interpreter: &mut Interpreter) -> Result<()> {
    interpreter.program(STANDARD_LIBRARY)?;
    debug!(functions = interpreter.function_names().len(), "loaded standard library");
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::{config::InterpreterConfig, interpreter::Interpreter, operand::Operand, test_utils::SharedBuffer};

    fn integers(values: &[i64]) -> Operand {
        Operand::list(values.iter().copied().map(Operand::Integer).collect())
    }

    fn run(source: &str) -> Operand {
        let mut interpreter = Interpreter::new(InterpreterConfig::default()).unwrap();
        interpreter.program(source).unwrap().unwrap()
    }

    #[test]
    fn both_reversals_agree() {
        assert_eq!(run("reverse_rec([1 2 3])"), integers(&[3, 2, 1]));
        assert_eq!(run("reverse_iter([1 2 3])"), integers(&[3, 2, 1]));
        assert_eq!(run("reverse_rec([])"), integers(&[]));
        assert_eq!(run("reverse_iter([])"), integers(&[]));
    }

    #[test]
    fn higher_order_helpers() {
        assert_eq!(run("map_(λ(x:ℤ) : ℤ { x * 10 } [1 2])"), integers(&[10, 20]));
        assert_eq!(run("filter_([1 2 3 4] λ(x:ℤ) : 𝔹 { x > 2 })"), integers(&[3, 4]));
        assert_eq!(run("reduce_([1 2 3] λ(a:ℤ b:ℤ) : ℤ { a + b } 0)"), Operand::Integer(6));
        assert_eq!(run("reduce_([1.5 2.5] λ(a:ℝ b:ℝ) : ℝ { a * b } 1.0)"), Operand::Real(3.75));
        assert_eq!(run("reduce_([true false] λ(a:𝔹 b:𝔹) : 𝔹 { a and b } true)"), Operand::Boolean(false));
        assert_eq!(run("foreach([1 2] λ(x:ℤ) : ℤ { x + 1 } [0])"), integers(&[0, 2, 3]));
    }

    #[test]
    fn zips_stop_at_the_shorter_list() {
        let expected = Operand::list(vec![integers(&[1, 3]), integers(&[2, 4])]);
        assert_eq!(run("zip([1 2] [3 4 5])"), expected);
        assert_eq!(run("zip2([1 2 7] [3 4])"), expected);
        assert_eq!(run("zip2([] [3 4])"), integers(&[]));
    }

    #[test]
    fn for_visits_every_element() {
        let mut interpreter = Interpreter::new(InterpreterConfig::default()).unwrap();
        let buffer = SharedBuffer::default();
        interpreter.set_output(Box::new(buffer.clone()));
        let result = interpreter.program("for_(λ(x:ℤ) { print(x \";\") } [1 2 3])").unwrap();
        assert_eq!(result, None);
        assert_eq!(buffer.contents(), "1;2;3;");
    }

    #[test]
    fn helpers_leave_globals_alone() {
        let mut interpreter = Interpreter::new(InterpreterConfig::default()).unwrap();
        interpreter.program("index <- \"first\" accum <- 0 f(x:ℤ) : ℤ { x * 100 }").unwrap();

        let mapped = interpreter.program("map_(λ(x:ℤ) : ℤ { x + 1 } [1 2])").unwrap();
        assert_eq!(mapped, Some(integers(&[2, 3])));
        let sum = interpreter.program("reduce_([1 2 3] λ(a:ℤ b:ℤ) : ℤ { a + b } 0)").unwrap();
        assert_eq!(sum, Some(Operand::Integer(6)));
        let kept = interpreter.program("filter_([1 2 3] λ(x:ℤ) : 𝔹 { x <> 2 })").unwrap();
        assert_eq!(kept, Some(integers(&[1, 3])));
        assert_eq!(interpreter.program("reverse_iter([1 2])").unwrap(), Some(integers(&[2, 1])));

        assert_eq!(interpreter.lookup("index"), Some(Operand::from("first")));
        assert_eq!(interpreter.lookup("accum"), Some(Operand::Integer(0)));
        assert_eq!(interpreter.program("f(2)").unwrap(), Some(Operand::Integer(200)));
    }

    #[test]
    fn timing() {
        assert!(matches!(run("timeit(λ() { x <- 1 + 1 })"), Operand::Integer(millis) if millis >= 0));
        let Operand::List(parts) = run("timeit(λ(x:ℤ) : ℤ { x * x } [2 3])") else { panic!("expected a list") };
        assert_eq!(parts[1], integers(&[4, 9]));
    }
}
