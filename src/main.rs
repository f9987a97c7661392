// Entrypoint for `osimage-upload`.
// - Keeps `main` small: parse, build the config once, hand it to the workflow.
// - Every failure ends with exit status 1.

use std::process;

use osimage_cli::cli::parse_arguments;
use osimage_cli::config::Config;
use osimage_cli::error::WorkflowError;
use osimage_cli::output::Console;
use osimage_cli::runner::SystemRunner;
use osimage_cli::{telemetry, workflow};

fn main() {
    if let Err(err) = telemetry::init() {
        eprintln!("{err:#}");
    }

    let request = match parse_arguments(std::env::args_os()) {
        Ok(request) => request,
        Err(WorkflowError::Help(text)) => {
            print!("{text}");
            process::exit(1);
        }
        Err(err) => {
            eprint!("{err}");
            process::exit(err.exit_code());
        }
    };

    // Environment is read exactly once, here.
    let environment = std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect();
    let config = Config::new(request, environment);
    let runner = SystemRunner::from_env();
    let mut console = Console::stderr();

    match workflow::run_with_defaults(&config, &runner, &mut console) {
        Ok(result) => {
            console.success(&format!(
                "upload of '{}' finished with status {}",
                result.name, result.status
            ));
        }
        Err(err) => {
            let code = err.exit_code();
            console.error(&format!("{:#}", anyhow::Error::new(err)));
            process::exit(code);
        }
    }
}
