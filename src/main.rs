use colored::Colorize;
use portctl::{
    cli::{Cli, Commands},
    commands::{
        CheckCommand, DoctorCommand, KillCommand, ListCommand, PickCommand, RunCommand,
        WhoCommand,
    },
    Result, Settings,
};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PORTCTL_LOG";

/// `check` reports errors with this code so they are distinguishable from
/// "in use" (1).
const CHECK_ERROR_EXIT: i32 = 2;
const INTERRUPTED_EXIT: i32 = 130;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse_args();
    if cli.no_color {
        colored::control::set_override(false);
    }
    init_tracing(cli.debug);

    let is_check = matches!(cli.command, Commands::Check { .. });
    let code = if matches!(cli.command, Commands::Run { .. }) {
        // run waits for its child through Ctrl-C itself
        report(run(cli).await, is_check)
    } else {
        tokio::select! {
            result = run(cli) => report(result, is_check),
            _ = tokio::signal::ctrl_c() => {
                eprintln!("{} interrupted", "error:".red());
                INTERRUPTED_EXIT
            }
        }
    };
    std::process::exit(code);
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("portctl=debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report(result: Result<i32>, is_check: bool) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            if is_check {
                CHECK_ERROR_EXIT
            } else {
                e.exit_code()
            }
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let settings = Settings::load()?;
    tracing::debug!(?settings, "loaded settings");
    let json = cli.json;

    match cli.command {
        Commands::List {
            filter,
            port,
            unique,
            verbose,
        } => {
            ListCommand::execute(&settings, filter, port, unique, verbose, json).await?;
        }
        Commands::Who { port } => {
            WhoCommand::execute(&settings, port, json).await?;
        }
        Commands::Kill {
            port,
            signal,
            timeout,
            force,
            dry_run,
        } => {
            KillCommand::execute(&settings, port, signal, timeout, force, dry_run, json).await?;
        }
        Commands::Pick { prefer, range } => {
            PickCommand::execute(&settings, prefer, range, json)?;
        }
        Commands::Run {
            prefer,
            range,
            env,
            command,
        } => {
            return RunCommand::execute(&settings, prefer, range, &env, &command).await;
        }
        Commands::Check { port, wait } => {
            let in_use = CheckCommand::execute(&settings, port, wait, json).await?;
            return Ok(i32::from(in_use));
        }
        Commands::Doctor => {
            DoctorCommand::execute(&settings, json).await?;
        }
    }

    Ok(0)
}
