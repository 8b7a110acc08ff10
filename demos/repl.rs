use cellisp::{Environment, Error, create_global_env, eval, read_from_string};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::env;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let env = match create_global_env() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("Failed to build the global environment: {e}");
            return ExitCode::FAILURE;
        }
    };

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        run_repl(&env)
    } else {
        run_batch(&env, &paths)
    }
}

/// Load each file in order; the first error aborts the run
fn run_batch(env: &Environment, paths: &[String]) -> ExitCode {
    for path in paths {
        if let Err(e) = env.load_file(path) {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn run_repl(env: &Environment) -> ExitCode {
    println!("Cellisp");
    println!("Enter S-expressions like: (+ 1 2)");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Could not initialize REPL: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Holds the lines of an expression that is still missing its closing parts
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "cellisp> " } else { "   ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match trimmed {
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(env);
                            continue;
                        }
                        ":quit" | ":exit" => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                } else {
                    pending.push('\n');
                }
                pending.push_str(&line);

                // Only an unfinished read of this buffer asks for another line
                match read_from_string(&pending) {
                    Err(e) if e.is_incomplete_input() => continue,
                    read => {
                        let _ = rl.add_history_entry(pending.as_str());
                        pending.clear();
                        report(read.and_then(|(expr, _)| eval(&expr, env)));
                    }
                }
            }

            Err(ReadlineError::Interrupted) => {
                // Ctrl+C abandons a partial expression
                if pending.is_empty() {
                    println!("Goodbye!");
                    break;
                }
                pending.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn report(result: Result<cellisp::Value, Error>) {
    match result {
        Ok(value) => println!("{value}"),
        Err(e) => println!("Error: {e}"),
    }
}

fn print_help() {
    println!("Cellisp Help");
    println!("============");
    println!();
    println!("Commands:");
    println!("  :help         Show this help message");
    println!("  :env          Show the current environment bindings");
    println!("  :quit, :exit  Exit the REPL");
    println!();
    println!("Examples:");
    println!("  (def x 10)");
    println!("  (defn (square n) (* n n))");
    println!("  (map square '(1 2 3))");
    println!("  (def xs '(1 2))");
    println!("  `(a ,x ,@xs)");
    println!("  (defmacro (twice e) `(begin ,e ,e))");
    println!("  (load \"file.lisp\")");
    println!();
    println!("An unfinished expression continues on the next line.");
}

fn print_environment(env: &Environment) {
    let bindings = env.bindings();
    if bindings.is_empty() {
        println!("Environment is empty");
        return;
    }

    println!("Environment bindings:");
    for (name, value) in bindings {
        println!("  {name} = {value}");
    }
}
