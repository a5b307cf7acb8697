//! Command-line front end for `socker`.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use socker_core::ConfigOverrides;
use socker_core::ContainerIdentity;
use socker_core::MonitorHandle;
use socker_core::RunFailure;
use socker_core::START_TIMEOUT;
use socker_core::Session;
use socker_core::Socker;
use socker_core::SockerConfig;
use socker_core::SockerErr;
use socker_core::images::load_image_hub;
use socker_core::images::render_table;
use socker_core::mounts::RealUidProbe;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Extra time given to the monitor after the start deadline.
const MONITOR_GRACE: Duration = Duration::from_secs(5);

/// Run containers as yourself, confined to your scheduler job.
///
/// Socker's own options go before the subcommand; everything after `run`
/// belongs to the engine.
#[derive(Debug, Parser)]
#[clap(author, version, bin_name = "socker")]
pub struct Cli {
    /// Log credentials, engine command lines and cgroup paths.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Record container identities for the scheduler epilog.
    #[arg(long)]
    pub epilog: bool,

    /// Skip the swap directory and home-directory permission changes.
    #[arg(long)]
    pub insecure: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the images available in an images hub.
    Images(ImagesCommand),

    /// Run a container: socker run [OPTIONS] IMAGE [COMMAND...]
    Run(RunCommand),
}

#[derive(Debug, clap::Args)]
pub struct ImagesCommand {
    /// Images hub file, or a directory of YAML files.
    #[arg(long, short = 'c', value_name = "FILE_OR_PATH")]
    pub config: PathBuf,
}

#[derive(Debug, clap::Args)]
#[command(disable_help_flag = true)]
pub struct RunCommand {
    /// Engine options, the image and the command, as for `docker run`.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 1..,
        value_name = "ARGS"
    )]
    pub args: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            verbose: self.verbose.then_some(true),
            epilog: self.epilog.then_some(true),
            insecure: self.insecure.then_some(true),
        }
    }
}

/// Run the parsed command line and return the process exit code.
pub async fn run_main(cli: Cli) -> i32 {
    let config = match SockerConfig::load(cli.overrides()) {
        Ok(config) => config,
        Err(err) => {
            init_tracing(cli.verbose);
            report(&err);
            return err.exit_code();
        }
    };
    init_tracing(config.verbose);

    let result = match cli.command {
        Command::Images(command) => list_images(command),
        Command::Run(command) => run_container(config, command.args).await,
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            report(&err);
            err.exit_code()
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

#[allow(clippy::print_stderr)]
fn report(err: &SockerErr) {
    eprintln!("socker: {err}");
}

#[allow(clippy::print_stdout)]
fn list_images(command: ImagesCommand) -> Result<i32, SockerErr> {
    let hub = load_image_hub(&command.config, &RealUidProbe)?;
    print!("{}", render_table(&hub));
    Ok(0)
}

async fn run_container(config: SockerConfig, args: Vec<String>) -> Result<i32, SockerErr> {
    let session = Session::establish(config)?;
    let socker = Socker::new(session);
    let outcome = match socker.run_image(&args).await {
        Ok(outcome) => outcome,
        Err(RunFailure {
            error,
            identity,
            monitor,
        }) => {
            // Report now; the container may still need confining.
            report(&error);
            if let (Some(identity), Some(monitor)) = (identity, monitor) {
                linger(&identity, monitor).await;
            }
            return Ok(error.exit_code());
        }
    };

    if let Some(output) = outcome.output.as_deref() {
        write_output(output)?;
    }
    linger(&outcome.identity, outcome.monitor).await;
    Ok(outcome.exit_code)
}

/// A detached or failed `docker run` can return before the container is up;
/// stay around long enough for the monitor to confine it. The exit code does
/// not depend on the result.
async fn linger(identity: &ContainerIdentity, monitor: MonitorHandle) {
    if !monitor.is_finished() {
        tracing::debug!("waiting for container {identity} to be confined");
    }
    if let Some(report) = monitor.settle(START_TIMEOUT + MONITOR_GRACE).await
        && let Some(err) = report.first_error()
    {
        tracing::warn!("container {identity} was not fully confined: {err}");
    }
}

fn write_output(output: &str) -> Result<(), SockerErr> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_keeps_hyphenated_engine_options() {
        let cli = Cli::try_parse_from([
            "socker", "--epilog", "run", "-it", "-v", "/data:/data", "--rm", "ubuntu", "bash",
            "-l",
        ])
        .expect("parse");
        assert!(cli.epilog);
        match cli.command {
            Command::Run(run) => assert_eq!(
                run.args,
                vec!["-it", "-v", "/data:/data", "--rm", "ubuntu", "bash", "-l"]
            ),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn leading_volume_flag_belongs_to_the_engine() {
        let cli = Cli::try_parse_from(["socker", "run", "-v", "/data:/data", "alpine", "ls"])
            .expect("parse");
        assert!(!cli.verbose);
        match cli.command {
            Command::Run(run) => {
                assert_eq!(run.args, vec!["-v", "/data:/data", "alpine", "ls"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn socker_options_before_run_stay_separate() {
        let cli = Cli::try_parse_from([
            "socker",
            "-v",
            "--insecure",
            "run",
            "--volume=/data:/data",
            "--epilog",
            "alpine",
        ])
        .expect("parse");
        assert!(cli.verbose);
        assert!(cli.insecure);
        assert!(!cli.epilog);
        match cli.command {
            Command::Run(run) => {
                assert_eq!(run.args, vec!["--volume=/data:/data", "--epilog", "alpine"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_forwards_short_h_as_hostname() {
        let cli = Cli::try_parse_from(["socker", "run", "-h", "node1", "alpine"]).expect("parse");
        match cli.command {
            Command::Run(run) => assert_eq!(run.args, vec!["-h", "node1", "alpine"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn images_requires_config() {
        assert!(Cli::try_parse_from(["socker", "images"]).is_err());
        let cli = Cli::try_parse_from(["socker", "images", "-c", "/etc/socker/images.yaml"])
            .expect("parse");
        assert!(matches!(cli.command, Command::Images(_)));
    }

    #[test]
    fn flags_become_overrides() {
        let cli = Cli::try_parse_from(["socker", "--insecure", "images", "-c", "hub.yaml"])
            .expect("parse");
        assert_eq!(
            cli.overrides(),
            ConfigOverrides {
                verbose: None,
                epilog: None,
                insecure: Some(true),
            }
        );
    }
}
