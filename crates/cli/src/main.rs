mod terminal;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use stevedore_runtime::backend::HttpBackendApi;
use stevedore_runtime::config::default_config_path;
use stevedore_runtime::{AppCollaborators, AppContext, ConfigStore, EnvironmentOverrides};
use stevedore_types::ConnectionState;
use tracing::{debug, info};

use crate::terminal::{TerminalProgress, TerminalPrompter, read_line};
use crate::transport::{HealthSocketFactory, NoopWatchers};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let matches = build_cli().get_matches();

    let config_path = default_config_path();
    let config = Arc::new(
        ConfigStore::load(&config_path).with_context(|| format!("failed to load configuration from {}", config_path.display()))?,
    );
    let backend = Arc::new(HttpBackendApi::new()?);
    let collaborators = AppCollaborators {
        backend: backend.clone(),
        sockets: Arc::new(HealthSocketFactory::new(backend)),
        watchers: Arc::new(NoopWatchers),
        prompter: Arc::new(TerminalPrompter::new(matches.get_flag("yes"))),
        progress: Arc::new(TerminalProgress),
    };
    let context = Arc::new(AppContext::new(config, EnvironmentOverrides::from_env(), collaborators));
    context.verify_cli_binary()?;

    let interrupt = {
        let context = context.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && context.lifecycle().cancel_running() {
                info!("cancelling the running command");
            }
        })
    };

    let succeeded = run_command(&context, &matches).await?;
    interrupt.abort();

    if let Some(path) = matches.get_one::<PathBuf>("log-file") {
        let written = context.export_log(path).await?;
        eprintln!("wrote {written} log line(s) to {}", path.display());
    }
    context.shutdown();

    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_cli() -> Command {
    let id_arg = || Arg::new("id").required(true).help("Connection id");
    Command::new("stevedore")
        .about("Manage the local Stevedore runtime and remote connections")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Write the runtime CLI output log to this file when the command ends"),
        )
        .arg(
            Arg::new("yes")
                .long("yes")
                .short('y')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Answer yes to every confirmation"),
        )
        .subcommand(Command::new("status").about("Show installed and running runtime versions"))
        .subcommand(Command::new("start").about("Install if needed, start the local runtime and connect to it"))
        .subcommand(Command::new("stop").about("Disconnect from and stop the local runtime"))
        .subcommand(
            Command::new("remove")
                .about("Remove an installed runtime version")
                .arg(Arg::new("tag").required(true).help("Version tag to remove")),
        )
        .subcommand(
            Command::new("connections")
                .about("Manage remote connections")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List remote connections"))
                .subcommand(
                    Command::new("add")
                        .about("Add a remote connection; the password is read from stdin")
                        .arg(Arg::new("label").long("label").required(true))
                        .arg(Arg::new("url").long("url").required(true))
                        .arg(Arg::new("username").long("username").required(true)),
                )
                .subcommand(Command::new("remove").about("Remove a remote connection").arg(id_arg()))
                .subcommand(Command::new("enable").about("Enable a remote connection").arg(id_arg()))
                .subcommand(Command::new("disable").about("Disable a remote connection").arg(id_arg())),
        )
}

/// Runs the selected command. Failures were already shown to the user; `Ok(false)` sets the exit code.
async fn run_command(context: &AppContext, matches: &ArgMatches) -> Result<bool> {
    let succeeded = match matches.subcommand() {
        Some(("status", _)) => match context.status().await {
            Ok(status) => {
                println!("{}", serde_json::to_string_pretty(&status)?);
                true
            }
            Err(_) => false,
        },
        Some(("start", _)) => match context.start_local().await {
            Ok(report) => {
                let url = report.url.as_deref().unwrap_or("unknown URL");
                println!("Local runtime {} is running at {url}", report.tag);
                if !report.removed.is_empty() {
                    println!("Removed versions: {}", report.removed.join(", "));
                }
                true
            }
            Err(_) => false,
        },
        Some(("stop", _)) => context.stop_local().await.is_ok(),
        Some(("remove", sub)) => {
            let tag = required(sub, "tag")?;
            context.remove_version(tag).await.is_ok()
        }
        Some(("connections", sub)) => run_connections(context, sub).await?,
        other => {
            debug!(command = ?other.map(|(name, _)| name), "unknown command");
            false
        }
    };
    Ok(succeeded)
}

async fn run_connections(context: &AppContext, matches: &ArgMatches) -> Result<bool> {
    if let Some(("add", sub)) = matches.subcommand() {
        let password = read_line("Password: ".to_string()).await.context("failed to read the password")?;
        let connection = match context
            .create_remote(required(sub, "label")?, required(sub, "url")?, required(sub, "username")?, &password)
            .await
        {
            Ok(connection) => connection,
            Err(_) => return Ok(false),
        };
        println!("Added {} ({}): {}", connection.label(), connection.id(), connection.state());
        if let Some(error) = connection.last_error() {
            eprintln!("  {error}");
        }
        return Ok(connection.state() == ConnectionState::Ready);
    }

    if context.load_remotes().await.is_err() {
        return Ok(false);
    }

    let succeeded = match matches.subcommand() {
        Some(("list", _)) => {
            for connection in context.registry().connections() {
                let status = match connection.state() {
                    ConnectionState::Disabled => "disabled",
                    _ => "enabled",
                };
                println!("{}\t{}\t{}\t{status}", connection.id(), connection.label(), connection.url());
            }
            true
        }
        Some(("remove", sub)) => context.remove_remote(required(sub, "id")?).await.is_ok(),
        Some(("enable", sub)) => match context.enable_connection(required(sub, "id")?).await {
            Ok(connection) => {
                println!("{} is {}", connection.label(), connection.state());
                true
            }
            Err(_) => {
                if let Some(error) = context.registry().get(required(sub, "id")?).and_then(|c| c.last_error()) {
                    eprintln!("error: {error}");
                }
                false
            }
        },
        Some(("disable", sub)) => context.disable_connection(required(sub, "id")?).await.is_ok(),
        _ => false,
    };
    Ok(succeeded)
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing required argument <{name}>"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_surface_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn global_flags_are_accepted_after_the_subcommand() {
        let matches = build_cli()
            .try_get_matches_from(["stevedore", "connections", "enable", "remote-1", "--log-file", "/tmp/out.log", "-y"])
            .unwrap();
        assert!(matches.get_flag("yes"));
        assert_eq!(matches.get_one::<PathBuf>("log-file"), Some(&PathBuf::from("/tmp/out.log")));
        let (_, connections) = matches.subcommand().unwrap();
        let (_, enable) = connections.subcommand().unwrap();
        assert_eq!(required(enable, "id").unwrap(), "remote-1");
    }

    #[test]
    fn remove_requires_a_tag() {
        assert!(build_cli().try_get_matches_from(["stevedore", "remove"]).is_err());
    }
}
