use std::{
    f64::consts,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    error::{Result, VelaError},
    function::{FunctionDescriptor, HostMethod, HostValue, Receiver},
    interpreter::Interpreter,
    operand::{Operand, Type},
};

type Builtin = fn(&mut Interpreter, Vec<Operand>) -> Result<Option<Operand>>;

// Julian date of the Unix epoch
const UNIX_EPOCH_JD: f64 = 2440587.5;

fn unexpected(name: &str, arguments: &[Operand]) -> VelaError {
    VelaError::eval(format!("{}: unexpected arguments {:?}", name, arguments))
}

fn builtin_print(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let precision = interpreter.config.precision;
    let text: String = arguments.iter().map(|value| value.to_string_with(precision)).collect();
    interpreter.write_output(&text)?;
    Ok(None)
}

fn builtin_println(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    builtin_print(interpreter, arguments)?;
    interpreter.write_output("\n")?;
    Ok(None)
}

fn builtin_eval(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::String(source)] = arguments.as_slice() else { return Err(unexpected("EVAL", &arguments)) };

    // Wrapped in a list so that "no value" has a representation
    let result = match interpreter.program(source)? {
        Some(value) => Operand::list(vec![value]),
        None => Operand::empty_list(),
    };
    Ok(Some(result))
}

fn builtin_intrinsics(interpreter: &mut Interpreter, _arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let names = interpreter.function_names().into_iter().map(Operand::String).collect();
    Ok(Some(Operand::list(names)))
}

fn builtin_help(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::Function(function)] = arguments.as_slice() else { return Err(unexpected("HELP", &arguments)) };
    let text = match &function.help {
        Some(help) => format!("{}\n{}", function, help),
        None => function.to_string(),
    };
    Ok(Some(Operand::String(text)))
}

fn builtin_chr(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::Integer(code)] = arguments.as_slice() else { return Err(unexpected("CHR", &arguments)) };
    let character = u32::try_from(*code).ok()
        .and_then(char::from_u32)
        .ok_or_else(|| VelaError::eval(format!("{} is not a character code", code)))?;
    Ok(Some(Operand::String(character.to_string())))
}

fn builtin_ord(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::String(text)] = arguments.as_slice() else { return Err(unexpected("ORD", &arguments)) };
    let character = text.chars().next().ok_or_else(|| VelaError::eval("ord of an empty string"))?;
    Ok(Some(Operand::Integer(character as i64)))
}

fn builtin_head(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::List(values)] = arguments.as_slice() else { return Err(unexpected("HEAD", &arguments)) };
    let head = values.first().cloned().ok_or_else(|| VelaError::eval("head of an empty list"))?;
    Ok(Some(head))
}

fn builtin_tail(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::List(values)] = arguments.as_slice() else { return Err(unexpected("TAIL", &arguments)) };
    let rest = values.get(1..).map(<[Operand]>::to_vec).unwrap_or_default();
    Ok(Some(Operand::list(rest)))
}

fn builtin_nth(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::List(values), Operand::Integer(index)] = arguments.as_slice() else {
        return Err(unexpected("NTH", &arguments));
    };
    let value = usize::try_from(*index).ok()
        .and_then(|index| values.get(index))
        .cloned()
        .ok_or_else(|| VelaError::eval(format!("index {} out of range for a list of length {}", index, values.len())))?;
    Ok(Some(value))
}

fn builtin_length(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let length = match arguments.as_slice() {
        [Operand::List(values)] => values.len(),
        [Operand::String(text)] => text.chars().count(),
        _ => return Err(unexpected("LENGTH", &arguments)),
    };
    Ok(Some(Operand::Integer(length as i64)))
}

fn builtin_concat(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::List(first), Operand::List(second)] = arguments.as_slice() else {
        return Err(unexpected("CONCAT", &arguments));
    };
    Ok(Some(Operand::list(first.iter().chain(second.iter()).cloned().collect())))
}

fn builtin_append(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::List(values), value] = arguments.as_slice() else { return Err(unexpected("APPEND", &arguments)) };
    let mut values = values.to_vec();
    values.push(value.clone());
    Ok(Some(Operand::list(values)))
}

fn builtin_seq(_interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let values = match arguments.as_slice() {
        [Operand::Integer(_), Operand::Integer(_), Operand::Integer(step)] if *step <= 0 => {
            return Err(VelaError::eval(format!("seq step must be positive, got {}", step)))
        }
        [Operand::Integer(start), Operand::Integer(end), Operand::Integer(step)] => {
            (*start..=*end).step_by(*step as usize).map(Operand::Integer).collect()
        }
        [Operand::Real(_), Operand::Real(_), Operand::Real(step)] if *step <= 0.0 => {
            return Err(VelaError::eval(format!("seq step must be positive, got {}", step)))
        }
        [Operand::Real(start), Operand::Real(end), Operand::Real(step)] => {
            // Multiplying keeps rounding errors from piling up
            let count = ((end - start) / step + 1e-9).floor();
            if count < 0.0 {
                vec![]
            } else {
                (0..=count as usize).map(|index| Operand::Real(start + index as f64 * step)).collect()
            }
        }
        _ => return Err(unexpected("SEQ", &arguments)),
    };
    Ok(Some(Operand::list(values)))
}

fn builtin_map(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [function, Operand::List(values)] = arguments.as_slice() else { return Err(unexpected("MAP", &arguments)) };

    let mut results = Vec::with_capacity(values.len());
    for value in values.iter() {
        let result = interpreter.apply(function, vec![value.clone()])?
            .ok_or_else(|| VelaError::eval("the function passed to map returned no value"))?;
        results.push(result);
    }
    Ok(Some(Operand::list(results)))
}

fn builtin_filter(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [predicate, Operand::List(values)] = arguments.as_slice() else {
        return Err(unexpected("FILTER", &arguments));
    };

    let mut kept = vec![];
    for value in values.iter() {
        match interpreter.apply(predicate, vec![value.clone()])? {
            Some(Operand::Boolean(true)) => kept.push(value.clone()),
            Some(Operand::Boolean(false)) => {}
            _ => return Err(VelaError::eval("the predicate passed to filter must return a BOOLEAN")),
        }
    }
    Ok(Some(Operand::list(kept)))
}

fn builtin_reduce(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [function, Operand::List(values), initial] = arguments.as_slice() else {
        return Err(unexpected("REDUCE", &arguments));
    };

    let mut accumulator = initial.clone();
    for value in values.iter() {
        accumulator = interpreter.apply(function, vec![accumulator, value.clone()])?
            .ok_or_else(|| VelaError::eval("the function passed to reduce returned no value"))?;
    }
    Ok(Some(accumulator))
}

fn builtin_for(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [function, Operand::List(values)] = arguments.as_slice() else { return Err(unexpected("FOR", &arguments)) };
    for value in values.iter() {
        interpreter.apply(function, vec![value.clone()])?;
    }
    Ok(None)
}

// %s, %d, %f, %.Nf and %%
fn builtin_format(interpreter: &mut Interpreter, arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let [Operand::String(template), Operand::List(values)] = arguments.as_slice() else {
        return Err(unexpected("FORMAT", &arguments));
    };

    let precision = interpreter.config.precision;
    let mut values = values.iter();
    let mut next_value = |directive: &str| {
        values.next().ok_or_else(|| VelaError::eval(format!("format: no value left for '{}'", directive)))
    };

    let mut result = String::new();
    let mut characters = template.chars().peekable();
    while let Some(character) = characters.next() {
        if character != '%' {
            result.push(character);
            continue;
        }

        match characters.next() {
            Some('%') => result.push('%'),
            Some('s') => result.push_str(&next_value("%s")?.to_string_with(precision)),
            Some('d') => match next_value("%d")? {
                Operand::Integer(value) => result.push_str(&value.to_string()),
                other => return Err(VelaError::eval(format!("format: %d needs an INTEGER, got {}", other.type_of()))),
            },
            Some('f') => {
                let value = next_value("%f")?;
                let value = value.as_real()
                    .ok_or_else(|| VelaError::eval(format!("format: %f needs a REAL, got {}", value.type_of())))?;
                result.push_str(&format!("{:.6}", value));
            }
            Some('.') => {
                let mut digits = String::new();
                while let Some(digit) = characters.next_if(char::is_ascii_digit) {
                    digits.push(digit);
                }
                let places: usize = digits.parse()
                    .map_err(|_| VelaError::eval(format!("format: bad precision in '%.{}'", digits)))?;
                if characters.next() != Some('f') {
                    return Err(VelaError::eval(format!("format: '%.{}' must be followed by 'f'", digits)));
                }
                let value = next_value("%.f")?;
                let value = value.as_real()
                    .ok_or_else(|| VelaError::eval(format!("format: %f needs a REAL, got {}", value.type_of())))?;
                result.push_str(&format!("{:.*}", places, value));
            }
            Some(other) => return Err(VelaError::eval(format!("format: unknown directive '%{}'", other))),
            None => return Err(VelaError::eval("format: the template ends with '%'")),
        }
    }

    Ok(Some(Operand::String(result)))
}

fn since_epoch() -> Result<std::time::Duration> {
    SystemTime::now().duration_since(UNIX_EPOCH)
        .map_err(|err| VelaError::eval(format!("system clock is before 1970: {}", err)))
}

fn builtin_milliseconds(_interpreter: &mut Interpreter, _arguments: Vec<Operand>) -> Result<Option<Operand>> {
    Ok(Some(Operand::Integer(since_epoch()?.as_millis() as i64)))
}

// Julian date of the current day at 0h UT
fn builtin_today(_interpreter: &mut Interpreter, _arguments: Vec<Operand>) -> Result<Option<Operand>> {
    let days = (since_epoch()?.as_secs() / 86_400) as f64;
    Ok(Some(Operand::Real(UNIX_EPOCH_JD + days)))
}

const NATIVES: &[(&str, &[Type], Option<Type>, Builtin, &str)] = &[
    ("EVAL", &[Type::String], Some(Type::List), builtin_eval, "Evaluates a program, giving [] or a list holding its value"),
    ("INTRINSICS", &[], Some(Type::List), builtin_intrinsics, "Names of all global functions"),
    ("HELP", &[Type::Function], Some(Type::String), builtin_help, "Signature and description of a function"),
    ("CHR", &[Type::Integer], Some(Type::String), builtin_chr, "Character with the given code point"),
    ("ORD", &[Type::String], Some(Type::Integer), builtin_ord, "Code point of the first character"),
    ("HEAD", &[Type::List], Some(Type::Any), builtin_head, "First element of a non-empty list"),
    ("TAIL", &[Type::List], Some(Type::List), builtin_tail, "All but the first element"),
    ("NTH", &[Type::List, Type::Integer], Some(Type::Any), builtin_nth, "Element at a zero-based index"),
    ("LENGTH", &[Type::List], Some(Type::Integer), builtin_length, "Number of elements"),
    ("LENGTH", &[Type::String], Some(Type::Integer), builtin_length, "Number of characters"),
    ("CONCAT", &[Type::List, Type::List], Some(Type::List), builtin_concat, "Elements of both lists"),
    ("APPEND", &[Type::List, Type::Any], Some(Type::List), builtin_append, "The list with one more element"),
    ("SEQ", &[Type::Integer, Type::Integer, Type::Integer], Some(Type::List), builtin_seq, "Integers from start to end by step"),
    ("SEQ", &[Type::Real, Type::Real, Type::Real], Some(Type::List), builtin_seq, "Reals from start to end by step"),
    ("MAP", &[Type::Function, Type::List], Some(Type::List), builtin_map, "Applies a function to each element"),
    ("FILTER", &[Type::Function, Type::List], Some(Type::List), builtin_filter, "Elements satisfying a predicate"),
    ("REDUCE", &[Type::Function, Type::List, Type::Any], Some(Type::Any), builtin_reduce, "Folds a list from the left"),
    ("FOR", &[Type::Function, Type::List], None, builtin_for, "Calls a function on each element"),
    ("FORMAT", &[Type::String, Type::List], Some(Type::String), builtin_format, "Fills %s, %d, %f and %.Nf from a list"),
    ("MILLISECONDS", &[], Some(Type::Integer), builtin_milliseconds, "Milliseconds since the Unix epoch"),
    ("TODAY", &[], Some(Type::Real), builtin_today, "Julian date of today at 0h UT"),
];

fn host_argument(arguments: &[HostValue], index: usize) -> std::result::Result<&HostValue, String> {
    arguments.get(index).ok_or_else(|| format!("missing argument {}", index + 1))
}

fn register_math(interpreter: &mut Interpreter, name: &str, f: fn(f64) -> f64) {
    let method = HostMethod::new(&format!("Math.{}", name.to_lowercase()), Receiver::Static, move |_, arguments| {
        Ok(HostValue::Real(f(host_argument(&arguments, 0)?.as_real()?)))
    });
    interpreter.register_host_method(name, vec![Type::Real], Some(Type::Real), method);
}

fn register_binary_math(
    interpreter: &mut Interpreter,
    name: &str,
    integers: fn(i64, i64) -> i64,
    reals: fn(f64, f64) -> f64,
) {
    let method = HostMethod::new(&format!("Math.{}", name.to_lowercase()), Receiver::Static, move |_, arguments| {
        Ok(HostValue::Integer(integers(host_argument(&arguments, 0)?.as_integer()?, host_argument(&arguments, 1)?.as_integer()?)))
    });
    interpreter.register_host_method(name, vec![Type::Integer, Type::Integer], Some(Type::Integer), method);

    let method = HostMethod::new(&format!("Math.{}", name.to_lowercase()), Receiver::Static, move |_, arguments| {
        Ok(HostValue::Real(reals(host_argument(&arguments, 0)?.as_real()?, host_argument(&arguments, 1)?.as_real()?)))
    });
    interpreter.register_host_method(name, vec![Type::Real, Type::Real], Some(Type::Real), method);
}

fn register_string_method(
    interpreter: &mut Interpreter,
    name: &str,
    parameter_types: &[Type],
    return_type: Type,
    f: impl Fn(&str, &[HostValue]) -> std::result::Result<HostValue, String> + 'static,
) {
    let method = HostMethod::new(&format!("String.{}", name.to_lowercase()), Receiver::FirstArgument, move |receiver, arguments| {
        let receiver = receiver.ok_or("missing receiver")?;
        f(receiver.as_str()?, &arguments)
    });

    let mut types = vec![Type::String];
    types.extend_from_slice(parameter_types);
    interpreter.register_host_method(name, types, Some(return_type), method);
}

// Math functions and string methods are bound through the host method
// interface, the same way an embedding application binds its own
fn register_host_library(interpreter: &mut Interpreter) {
    let unary: &[(&str, fn(f64) -> f64)] = &[
        ("SQRT", f64::sqrt),
        ("SIN", f64::sin),
        ("COS", f64::cos),
        ("TAN", f64::tan),
        ("ASIN", f64::asin),
        ("ACOS", f64::acos),
        ("ATAN", f64::atan),
        ("EXP", f64::exp),
        ("LOG", f64::ln),
        ("LOG10", f64::log10),
        ("FLOOR", f64::floor),
        ("CEIL", f64::ceil),
    ];
    for (name, f) in unary {
        register_math(interpreter, name, *f);
    }

    let atan2 = HostMethod::new("Math.atan2", Receiver::Static, |_, arguments| {
        Ok(HostValue::Real(host_argument(&arguments, 0)?.as_real()?.atan2(host_argument(&arguments, 1)?.as_real()?)))
    });
    interpreter.register_host_method("ATAN2", vec![Type::Real, Type::Real], Some(Type::Real), atan2);

    let abs = HostMethod::new("Math.abs", Receiver::Static, |_, arguments| {
        Ok(HostValue::Integer(host_argument(&arguments, 0)?.as_integer()?.wrapping_abs()))
    });
    interpreter.register_host_method("ABS", vec![Type::Integer], Some(Type::Integer), abs);
    register_math(interpreter, "ABS", f64::abs);

    let round = HostMethod::new("Math.round", Receiver::Static, |_, arguments| {
        Ok(HostValue::Integer(host_argument(&arguments, 0)?.as_real()?.round() as i64))
    });
    interpreter.register_host_method("ROUND", vec![Type::Real], Some(Type::Integer), round);

    register_binary_math(interpreter, "MIN", i64::min, f64::min);
    register_binary_math(interpreter, "MAX", i64::max, f64::max);

    register_string_method(interpreter, "UPPER", &[], Type::String, |text, _| Ok(HostValue::String(text.to_uppercase())));
    register_string_method(interpreter, "LOWER", &[], Type::String, |text, _| Ok(HostValue::String(text.to_lowercase())));
    register_string_method(interpreter, "TRIM", &[], Type::String, |text, _| Ok(HostValue::String(text.trim().to_owned())));
    register_string_method(interpreter, "CONTAINS", &[Type::String], Type::Boolean, |text, arguments| {
        Ok(HostValue::Boolean(text.contains(host_argument(arguments, 0)?.as_str()?)))
    });
    register_string_method(interpreter, "STARTSWITH", &[Type::String], Type::Boolean, |text, arguments| {
        Ok(HostValue::Boolean(text.starts_with(host_argument(arguments, 0)?.as_str()?)))
    });
    register_string_method(interpreter, "ENDSWITH", &[Type::String], Type::Boolean, |text, arguments| {
        Ok(HostValue::Boolean(text.ends_with(host_argument(arguments, 0)?.as_str()?)))
    });
    register_string_method(interpreter, "INDEXOF", &[Type::String], Type::Integer, |text, arguments| {
        let index = text.find(host_argument(arguments, 0)?.as_str()?)
            .map(|byte| text[..byte].chars().count() as i64)
            .unwrap_or(-1);
        Ok(HostValue::Integer(index))
    });
    register_string_method(interpreter, "SUBSTRING", &[Type::Integer, Type::Integer], Type::String, |text, arguments| {
        let begin = host_argument(arguments, 0)?.as_integer()?;
        let end = host_argument(arguments, 1)?.as_integer()?;
        let length = text.chars().count() as i64;
        if begin < 0 || end > length || begin > end {
            return Err(format!("begin {}, end {}, length {}", begin, end, length));
        }
        Ok(HostValue::String(text.chars().skip(begin as usize).take((end - begin) as usize).collect()))
    });
    register_string_method(interpreter, "REPLACE", &[Type::String, Type::String], Type::String, |text, arguments| {
        let from = host_argument(arguments, 0)?.as_str()?;
        let to = host_argument(arguments, 1)?.as_str()?;
        Ok(HostValue::String(text.replace(from, to)))
    });
    register_string_method(interpreter, "SPLIT", &[Type::String], Type::List, |text, arguments| {
        let separator = host_argument(arguments, 0)?.as_str()?;
        Ok(HostValue::List(text.split(separator).map(|part| HostValue::String(part.to_owned())).collect()))
    });
}

pub(crate) fn register_builtins(interpreter: &mut Interpreter) -> Result<()> {
    interpreter.register(FunctionDescriptor::variadic("PRINT", None, builtin_print).with_help("Writes its arguments"));
    interpreter.register(
        FunctionDescriptor::variadic("PRINTLN", None, builtin_println).with_help("Writes its arguments and a newline"),
    );
    for (name, parameter_types, return_type, builtin, help) in NATIVES {
        interpreter.register(FunctionDescriptor::native(name, parameter_types.to_vec(), *return_type, *builtin).with_help(help));
    }
    register_host_library(interpreter);

    interpreter.define_constant("PI", Operand::Real(consts::PI))?;
    interpreter.define_constant("π", Operand::Real(consts::PI))?;
    interpreter.define_constant("E", Operand::Real(consts::E))?;
    Ok(())
}
