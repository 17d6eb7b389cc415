// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Smoke tests against the compiled `warden` binary. None of these store a
//! session, so they do not depend on an OS keyring being available.

use warden_specs::{unreachable_url, warden_binary, IdentityService, Warden};

#[test]
fn help_lists_subcommands() -> anyhow::Result<()> {
    let output = std::process::Command::new(warden_binary()).arg("--help").output()?;
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout)?;
    for sub in ["login", "logout", "status", "refresh", "header", "check", "api-key", "watch"] {
        assert!(text.contains(sub), "missing {sub} in help");
    }
    Ok(())
}

#[test]
fn invalid_config_exits_with_usage_error() -> anyhow::Result<()> {
    let warden = Warden::new("ftp://example.com")?;
    let output = warden.run(&["status"])?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8(output.stderr)?.contains("--api-url"));
    Ok(())
}

#[test]
fn status_without_session_is_guest() -> anyhow::Result<()> {
    let warden = Warden::new(unreachable_url()?)?;
    let (code, status) = warden.run_json(&["status"])?;
    assert_eq!(code, 1);
    assert_eq!(status["phase"], "guest");
    assert_eq!(status["state"]["authenticated"], false);
    assert_eq!(status["state"]["role"], "guest");
    assert_eq!(status["refresh_token"], false);
    Ok(())
}

#[test]
fn check_without_session_asks_for_login() -> anyhow::Result<()> {
    let warden = Warden::new(unreachable_url()?)?;
    let (code, decision) = warden.run_json(&["check", "dashboard"])?;
    assert_eq!(code, 1);
    assert_eq!(decision["allowed"], false);
    assert_eq!(decision["reason"], "requiresLogin");
    assert_eq!(decision["affordance"], "login");
    Ok(())
}

#[test]
fn check_unknown_feature_is_usage_error() -> anyhow::Result<()> {
    let warden = Warden::new(unreachable_url()?)?;
    assert_eq!(warden.run(&["check", "teleporter"])?.status.code(), Some(2));
    Ok(())
}

#[test]
fn login_against_unreachable_service_fails() -> anyhow::Result<()> {
    let warden = Warden::new(unreachable_url()?)?;
    let output = warden.run(&["login", "--identifier", "ada", "--secret", "pw"])?;
    assert_eq!(output.status.code(), Some(3));
    assert!(output.stdout.is_empty());
    Ok(())
}

#[tokio::test]
async fn refused_login_exits_denied() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    service.reply("/auth/login", 401, warden_specs::failure("Wrong password"));
    let warden = Warden::new(service.url())?;

    let output = tokio::task::spawn_blocking(move || {
        warden.run(&["login", "--identifier", "ada", "--secret", "nope"])
    })
    .await??;
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(service.calls("/auth/login"), 1);
    Ok(())
}
