// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcommand dispatch for the `warden` binary.

use std::io::IsTerminal;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::{Cli, Command};
use crate::host::{HeadlessHost, HostUi};
use crate::manager::{DeferredRetry, Phase, RefreshOutcome, SessionManager};
use crate::policy::Feature;
use crate::state::SessionState;
use crate::store::{CredentialStore, FileBackup, KeyringBackend};
use crate::terminal::TerminalHost;

/// Process exit codes.
pub mod exit {
    pub const OK: i32 = 0;
    /// The operation ran but the answer is "no" (signed out, access denied).
    pub const DENIED: i32 = 1;
    pub const USAGE: i32 = 2;
    /// The identity service or the credential store failed.
    pub const FAILED: i32 = 3;
}

#[derive(Serialize)]
struct StatusReport<'a> {
    phase: Phase,
    state: &'a SessionState,
    remaining_secs: Option<i64>,
    refresh_token: bool,
    deferred_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified: Option<bool>,
}

/// Store backed by the OS keyring plus the backup file under the state dir.
pub fn default_store(cli: &Cli) -> CredentialStore {
    CredentialStore::new(
        Box::new(KeyringBackend::new(cli.session.keyring_service.clone())),
        Box::new(FileBackup::new(cli.session.backup_path())),
    )
}

pub fn default_host() -> Arc<dyn HostUi> {
    if std::io::stdin().is_terminal() {
        Arc::new(TerminalHost)
    } else {
        Arc::new(HeadlessHost)
    }
}

/// Run one subcommand to completion and return the exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let store = Arc::new(default_store(&cli));
    run_with(cli, store, default_host()).await
}

pub async fn run_with(
    cli: Cli,
    store: Arc<CredentialStore>,
    host: Arc<dyn HostUi>,
) -> anyhow::Result<i32> {
    let manager = SessionManager::from_config(cli.session.clone(), store, Arc::clone(&host));
    let code = dispatch(&manager, cli.command, host.as_ref()).await;
    manager.dispose();
    code
}

async fn dispatch(
    manager: &Arc<SessionManager>,
    command: Command,
    host: &dyn HostUi,
) -> anyhow::Result<i32> {
    match command {
        Command::Login { identifier, secret } => {
            let request = match (identifier, secret) {
                (Some(identifier), Some(secret)) => crate::host::LoginRequest { identifier, secret },
                _ => match host.prompt_credentials() {
                    Some(request) => request,
                    None => {
                        eprintln!("error: an identifier and secret are required");
                        return Ok(exit::USAGE);
                    }
                },
            };
            match manager.login(&request.identifier, &request.secret).await {
                Ok(state) => {
                    print_json(&*state)?;
                    Ok(exit::OK)
                }
                Err(e) => {
                    debug!(code = %e.code, "login command failed");
                    Ok(if e.code.is_transient() { exit::FAILED } else { exit::DENIED })
                }
            }
        }
        Command::Logout => {
            manager.resume_cached();
            let report = manager.logout().await;
            if let Some(err) = report.store_error {
                eprintln!("warning: stored credentials may remain: {err}");
                return Ok(exit::FAILED);
            }
            Ok(exit::OK)
        }
        Command::Status { verify } => {
            let verified = if verify {
                manager.restore().await;
                match manager.verify().await {
                    Ok(ok) => Some(ok),
                    Err(e) => {
                        eprintln!("warning: could not verify session: {e}");
                        Some(false)
                    }
                }
            } else {
                manager.resume_cached();
                None
            };
            print_status(manager, verified)?;
            Ok(if manager.state().authenticated() { exit::OK } else { exit::DENIED })
        }
        Command::Refresh => {
            manager.resume_cached();
            let outcome = manager.refresh(false).await;
            info!(?outcome, "refresh finished");
            print_status(manager, None)?;
            Ok(match outcome {
                RefreshOutcome::Refreshed { .. } | RefreshOutcome::Recovered { .. } => exit::OK,
                RefreshOutcome::Deferred { .. } | RefreshOutcome::Failed(_) => exit::FAILED,
                _ => exit::DENIED,
            })
        }
        Command::Header => {
            manager.resume_cached();
            match manager.facade().auth_header() {
                Some(headers) => {
                    for (name, value) in headers {
                        println!("{name}: {value}");
                    }
                    Ok(exit::OK)
                }
                None => Ok(exit::DENIED),
            }
        }
        Command::Check { feature } => {
            let feature: Feature = match feature.parse() {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("error: {e}");
                    return Ok(exit::USAGE);
                }
            };
            manager.resume_cached();
            let decision = manager.facade().explain_denial(feature);
            print_json(&decision)?;
            Ok(if decision.allowed { exit::OK } else { exit::DENIED })
        }
        Command::ApiKey => {
            manager.resume_cached();
            match manager.api_key().await {
                Ok(Some(key)) => {
                    println!("{key}");
                    Ok(exit::OK)
                }
                Ok(None) => {
                    eprintln!("no API key is provisioned for this account");
                    Ok(exit::DENIED)
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    Ok(exit::FAILED)
                }
            }
        }
        Command::Watch => watch(manager).await,
    }
}

/// Keep the session fresh until Ctrl-C, printing each event as a JSON line.
async fn watch(manager: &Arc<SessionManager>) -> anyhow::Result<i32> {
    let mut events = manager.subscribe();
    manager.restore().await;
    manager.start_monitor();
    print_status(manager, None)?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "event stream lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    info!("watch stopped");
    Ok(exit::OK)
}

fn print_status(manager: &SessionManager, verified: Option<bool>) -> anyhow::Result<()> {
    let state = manager.state();
    let DeferredRetry { attempts, .. } = manager.deferred_retry();
    let report = StatusReport {
        phase: manager.phase(),
        state: &state,
        remaining_secs: manager.lifecycle().remaining_seconds(),
        refresh_token: manager.has_refresh_token(),
        deferred_retries: attempts,
        verified,
    };
    print_json(&report)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
