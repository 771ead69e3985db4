//! remote-exec - Entry point
//!
//! Parses CLI arguments, opens one SSH session per host, runs the requested
//! operation and tears every session down again, also on Ctrl+C.

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use remote_exec::config::{Args, Command, Config};
use remote_exec::error::{CalledProcessError, RemoteError, Result};
use remote_exec::{CommandResult, SshSession};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Logs go to stderr, stdout carries command output
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_args(args)?;

    info!("remote-exec v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Connecting to {} host(s) as {} on port {}",
        config.hosts.len(),
        config.user,
        config.port
    );

    let mut sessions = Vec::with_capacity(config.hosts.len());
    for target in config.ssh_configs().await? {
        let mut session = SshSession::new(target);
        if let Err(e) = session.enter().await {
            close_all(&mut sessions).await;
            return Err(e);
        }
        sessions.push(session);
    }

    let outcome = tokio::select! {
        outcome = run(&mut sessions, &config.command) => outcome,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
            Ok(ExitCode::from(130))
        }
    };

    close_all(&mut sessions).await;

    if let Err(ref e) = outcome {
        error!("{}", e);
    }
    outcome
}

#[derive(Serialize)]
struct HostResult<'a> {
    host: &'a str,
    result: &'a CommandResult,
}

async fn close_all(sessions: &mut [SshSession]) {
    for session in sessions.iter_mut() {
        session.exit().await;
    }
}

async fn run(sessions: &mut [SshSession], command: &Command) -> Result<ExitCode> {
    match command {
        Command::Exec {
            sudo,
            strict,
            json,
            command,
        } => {
            let line = command.join(" ");
            if sessions.len() == 1 {
                exec_one(&mut sessions[0], &line, *sudo, *strict, *json).await
            } else {
                exec_many(sessions, &line, *sudo, *json).await
            }
        }
        Command::Upload { source, target } => {
            for session in sessions.iter() {
                session.upload(source, target).await?;
                info!(host = %session.host(), "Uploaded {} to {}", source.display(), target);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Download { source, target } => {
            let [session] = sessions else {
                return Err(RemoteError::invalid_params(
                    "download needs exactly one --host",
                ));
            };
            if session.download(source, target).await? {
                info!(host = %session.host(), "Downloaded {} to {}", source, target.display());
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Mkdir { path } => {
            for session in sessions.iter() {
                session.mkdir(path).await?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn exec_one(
    session: &mut SshSession,
    command: &str,
    sudo: bool,
    strict: bool,
    json: bool,
) -> Result<ExitCode> {
    let outcome = if sudo {
        let guard = session.get_sudo();
        run_command(&guard, command, strict).await
    } else {
        run_command(session, command, strict).await
    };

    match outcome {
        Ok(result) => {
            if json {
                println!("{}", to_json(&result)?);
            } else {
                print_result(&result, None);
            }
            Ok(exit_code(result.exit_code()))
        }
        Err(RemoteError::CalledProcess(e)) => Ok(report_failure(&e)),
        Err(e) => Err(e),
    }
}

async fn run_command(session: &SshSession, command: &str, strict: bool) -> Result<CommandResult> {
    if strict {
        session.check_stderr(command).await
    } else {
        session.execute(command).await
    }
}

async fn exec_many(
    sessions: &mut [SshSession],
    command: &str,
    sudo: bool,
    json: bool,
) -> Result<ExitCode> {
    let outcome = if sudo {
        let guards: Vec<_> = sessions.iter_mut().map(SshSession::get_sudo).collect();
        let refs: Vec<&SshSession> = guards.iter().map(|g| &**g).collect();
        SshSession::execute_together(&refs, command).await
    } else {
        let refs: Vec<&SshSession> = sessions.iter().collect();
        SshSession::execute_together(&refs, command).await
    };

    match outcome {
        Ok(results) => {
            if json {
                let hosts: Vec<_> = results
                    .iter()
                    .map(|(host, result)| HostResult { host, result })
                    .collect();
                println!("{}", to_json(&hosts)?);
            } else {
                for (host, result) in &results {
                    print_result(result, Some(host.as_str()));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(RemoteError::CalledProcess(e)) => Ok(report_failure(&e)),
        Err(e) => Err(e),
    }
}

fn print_result(result: &CommandResult, host: Option<&str>) {
    let prefix = host.map(|h| format!("[{}] ", h)).unwrap_or_default();
    for line in result.stdout() {
        print!("{}{}", prefix, with_newline(line));
    }
    for line in result.stderr() {
        eprint!("{}{}", prefix, with_newline(line));
    }
}

fn with_newline(line: &str) -> String {
    if line.ends_with('\n') {
        line.to_string()
    } else {
        format!("{}\n", line)
    }
}

fn report_failure(e: &CalledProcessError) -> ExitCode {
    eprint!("{}", e.output);
    eprintln!("{}", e);
    match e.exit_code() {
        Some(code) if code != 0 => exit_code(code),
        _ => ExitCode::FAILURE,
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| RemoteError::invalid_params(format!("Cannot serialize result: {}", e)))
}
