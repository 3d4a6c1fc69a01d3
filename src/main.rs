use anyhow::{Error, anyhow};
use clap::Parser;
use pullrun::{ImageReference, Platform, RegistryConfig, RunOptions, config, run_container};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pullrun")]
#[command(about = "Pull an image from a registry and run a command inside it")]
struct Cli {
    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    Run {
        /// Registry API base URL
        #[arg(long, default_value = config::DEFAULT_REGISTRY_URL)]
        registry: String,

        /// Token service base URL
        #[arg(long, default_value = config::DEFAULT_AUTH_URL)]
        auth: String,

        /// Service name sent to the token service
        #[arg(long, default_value = config::DEFAULT_SERVICE)]
        service: String,

        /// Platform to select from multi-platform images, os/arch[/variant]
        #[arg(long)]
        platform: Option<Platform>,

        /// Keep the host PID namespace
        #[arg(long)]
        no_pid_namespace: bool,

        /// Retries for failed registry requests
        #[arg(long, default_value_t = 3)]
        retries: u32,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Image as name[:tag][@digest]
        image: String,

        /// Command to run and its arguments, passed through verbatim
        #[arg(
            value_name = "COMMAND",
            required = true,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        command: Vec<String>,
    },
}

fn init_logging(verbose: bool) -> Result<(), Error> {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))
}

fn run(cli: Cli) -> Result<i32, Error> {
    match cli.command {
        Commands::Run {
            registry,
            auth,
            service,
            platform,
            no_pid_namespace,
            retries,
            timeout,
            image,
            command,
        } => {
            let mut command = command.into_iter();
            let program = command.next().ok_or_else(|| anyhow!("no command given"))?;

            let mut registry_config = RegistryConfig {
                registry_url: registry,
                auth_url: auth,
                service,
                timeout: Duration::from_secs(timeout),
                ..RegistryConfig::default()
            };
            registry_config.retry.attempts = retries;

            let options = RunOptions {
                image: ImageReference::parse(&image)?,
                command: program,
                args: command.collect(),
                registry: registry_config,
                platform: platform.unwrap_or_else(Platform::current),
                pid_namespace: !no_pid_namespace,
            };
            Ok(run_container(&options, pullrun::default_backend())?)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{e:#}");
    }

    match run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            let code = e
                .downcast_ref::<pullrun::Error>()
                .map_or(pullrun::error::EXIT_FAILURE, pullrun::Error::exit_code);
            eprintln!("Error: {e:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
