// Entrypoint for `osimage-infra`: the Terraform task runner.

use std::process;

use osimage_cli::infra::{dialoguer_prompt, parse_infra_args, InfraError, Terraform};
use osimage_cli::output::Console;
use osimage_cli::runner::SystemRunner;
use osimage_cli::telemetry;

fn main() {
    if let Err(err) = telemetry::init() {
        eprintln!("{err:#}");
    }

    let cli = match parse_infra_args(std::env::args_os()) {
        Ok(cli) => cli,
        Err(InfraError::Usage(text)) => {
            eprint!("{text}");
            process::exit(1);
        }
        Err(err) => {
            eprintln!("{err}");
            process::exit(err.exit_code());
        }
    };
    let runner = SystemRunner::from_env();
    let terraform = Terraform::new(&runner, &cli);

    if let Err(err) = terraform.run_task(&cli.task, dialoguer_prompt) {
        let code = err.exit_code();
        // anyhow's alternate format appends the io source after the message.
        Console::stderr().error(&format!("{:#}", anyhow::Error::new(err)));
        process::exit(code);
    }
}
