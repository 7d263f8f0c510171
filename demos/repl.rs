use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use vela::{Interpreter, InterpreterConfig};

async fn query(stdout: &mut io::Stdout, lines: &mut io::Lines<io::BufReader<io::Stdin>>) -> io::Result<Option<String>> {
    stdout.write_all("vela> ".as_bytes()).await?;
    stdout.flush().await?;
    lines.next_line().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut interpreter = Interpreter::new(InterpreterConfig::default())?;
    let mut lines = io::BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = query(&mut stdout, &mut lines).await? {
        // `? expr` checks a filter expression
        if let Some(condition) = line.trim_start().strip_prefix('?') {
            match interpreter.boolean_expression(condition) {
                Ok(value) => println!("{}", value),
                Err(err) => eprintln!("Error: {}", err),
            }
            continue;
        }

        match interpreter.program(&line) {
            Ok(Some(value)) => println!("{}", value),
            Ok(None) => {}
            Err(err) => eprintln!("Error: {}", err),
        }
    }

    let stats = interpreter.cache_stats();
    println!("{} parsed, {} reused", stats.ast_misses, stats.ast_hits);

    Ok(())
}
