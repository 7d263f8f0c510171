//! Selects observations with a user-supplied VeLa filter. Each observation
//! is exposed to the expression through a host environment.

use std::rc::Rc;

use vela::{HostMethod, HostValue, Interpreter, InterpreterConfig, MapEnvironment, Receiver, Type};

struct Observation {
    time: f64,
    magnitude: f64,
    band: &'static str,
}

const OBSERVATIONS: &[Observation] = &[
    Observation { time: 2459000.5, magnitude: 8.1, band: "V" },
    Observation { time: 2459001.5, magnitude: 8.4, band: "V" },
    Observation { time: 2459002.5, magnitude: 9.2, band: "B" },
    Observation { time: 2459003.5, magnitude: 7.9, band: "Vis." },
];

fn main() -> anyhow::Result<()> {
    let filter = std::env::args().nth(1)
        .unwrap_or_else(|| "band in [\"V\" \"Vis.\"] and magnitude < brightest + 0.5".to_owned());

    let mut interpreter = Interpreter::new(InterpreterConfig::default())?;
    let brightest = OBSERVATIONS.iter().map(|observation| observation.magnitude).fold(f64::INFINITY, f64::min);
    interpreter.register_host_method(
        "BRIGHTEST",
        vec![],
        Some(Type::Real),
        HostMethod::new("Observations.brightest", Receiver::Static, move |_, _| Ok(HostValue::Real(brightest))),
    );

    for observation in OBSERVATIONS {
        let mut environment = MapEnvironment::new()
            .with("time", observation.time)
            .with("magnitude", observation.magnitude)
            .with("band", observation.band);
        environment.alias("mag", "magnitude");
        environment.alias("jd", "time");

        let selected = interpreter.with_environment(Rc::new(environment), |interpreter| {
            interpreter.boolean_expression(&filter)
        })?;
        if selected {
            println!("{:.1} {:.1} {}", observation.time, observation.magnitude, observation.band);
        }
    }

    Ok(())
}
