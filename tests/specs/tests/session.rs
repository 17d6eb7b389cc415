// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subcommands run in-process against a stand-in identity service, sharing
//! one credential store between invocations.

use serde_json::json;

use warden::cli::exit;
use warden::store::keys;
use warden_specs::{failure, IdentityService, Session};

#[tokio::test]
async fn full_session_lifecycle() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());

    assert_eq!(session.run(&["status"]).await?, exit::DENIED);
    assert_eq!(session.run(&["login", "--identifier", "ada", "--secret", "pw"]).await?, exit::OK);
    assert_eq!(session.store().get(keys::ACCESS_TOKEN)?.as_deref(), Some("access-1"));

    assert_eq!(session.run(&["status"]).await?, exit::OK);
    assert_eq!(session.run(&["header"]).await?, exit::OK);
    assert_eq!(session.run(&["check", "dashboard"]).await?, exit::OK);
    assert_eq!(session.run(&["check", "system-settings"]).await?, exit::DENIED);

    assert_eq!(session.run(&["api-key"]).await?, exit::OK);
    assert_eq!(session.run(&["api-key"]).await?, exit::OK);
    assert_eq!(service.calls("/user/apikey"), 1);

    assert_eq!(session.run(&["refresh"]).await?, exit::OK);
    assert_eq!(session.store().get(keys::ACCESS_TOKEN)?.as_deref(), Some("access-2"));
    // No new refresh token was issued, so the first one stays.
    assert_eq!(session.store().get(keys::REFRESH_TOKEN)?.as_deref(), Some("refresh-1"));

    assert_eq!(session.run(&["logout"]).await?, exit::OK);
    assert_eq!(service.calls("/auth/logout"), 1);
    assert_eq!(session.run(&["status"]).await?, exit::DENIED);
    assert_eq!(session.run(&["header"]).await?, exit::DENIED);
    for key in keys::ALL {
        assert_eq!(session.store().get(key)?, None, "{key}");
    }
    Ok(())
}

#[tokio::test]
async fn login_exit_codes_follow_failure_kind() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());
    let login = ["login", "--identifier", "ada", "--secret", "pw"];

    service.reply("/auth/login", 401, failure("Wrong password"));
    assert_eq!(session.run(&login).await?, exit::DENIED);

    service.reply("/auth/login", 503, failure("maintenance"));
    assert_eq!(session.run(&login).await?, exit::FAILED);

    assert_eq!(session.store().get(keys::ACCESS_TOKEN)?, None);
    Ok(())
}

#[tokio::test]
async fn login_needs_credentials_without_a_terminal() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());

    assert_eq!(session.run(&["login", "--identifier", "ada"]).await?, exit::USAGE);
    assert_eq!(service.requests(), 0);
    Ok(())
}

#[tokio::test]
async fn unknown_feature_is_a_usage_error() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());
    assert_eq!(session.run(&["check", "teleporter"]).await?, exit::USAGE);
    Ok(())
}

#[tokio::test]
async fn admin_reaches_unlisted_features() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    service.reply(
        "/auth/login",
        200,
        json!({
            "accessToken": "access-1",
            "refreshToken": "refresh-1",
            "expiresIn": 3_600,
            "user": { "_id": "u-9", "role": "Admin" }
        }),
    );
    let session = Session::new(service.url());

    assert_eq!(session.run(&["login", "--identifier", "root", "--secret", "pw"]).await?, exit::OK);
    assert_eq!(session.run(&["check", "system_settings"]).await?, exit::OK);
    assert_eq!(session.run(&["check", "Env Assistant"]).await?, exit::OK);
    Ok(())
}

#[tokio::test]
async fn verify_drops_a_revoked_session() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());
    assert_eq!(session.run(&["login", "--identifier", "ada", "--secret", "pw"]).await?, exit::OK);

    service.reply("/auth/check", 401, failure("revoked"));
    service.reply("/auth/refresh-token", 401, failure("revoked"));
    assert_eq!(session.run(&["status", "--verify"]).await?, exit::DENIED);
    assert_eq!(session.store().get(keys::ACCESS_TOKEN)?, None);
    assert_eq!(session.store().get(keys::USER_DATA)?, None);
    Ok(())
}

#[tokio::test]
async fn verify_outage_keeps_the_cached_session() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());
    assert_eq!(session.run(&["login", "--identifier", "ada", "--secret", "pw"]).await?, exit::OK);

    service.reply("/auth/check", 502, failure("bad gateway"));
    assert_eq!(session.run(&["status", "--verify"]).await?, exit::OK);
    assert_eq!(session.store().get(keys::ACCESS_TOKEN)?.as_deref(), Some("access-1"));
    Ok(())
}

#[tokio::test]
async fn refused_refresh_without_a_terminal_is_postponed() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());
    assert_eq!(session.run(&["login", "--identifier", "ada", "--secret", "pw"]).await?, exit::OK);

    // Nobody is there to confirm signing in again, so the session stays.
    service.reply("/auth/refresh-token", 401, failure("revoked"));
    assert_eq!(session.run(&["refresh"]).await?, exit::DENIED);
    assert_eq!(session.store().get(keys::ACCESS_TOKEN)?.as_deref(), Some("access-1"));
    assert_eq!(service.calls("/auth/logout"), 0);
    Ok(())
}

#[tokio::test]
async fn server_failure_during_refresh_is_reported() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());
    assert_eq!(session.run(&["login", "--identifier", "ada", "--secret", "pw"]).await?, exit::OK);

    service.reply("/auth/refresh-token", 500, failure("boom"));
    assert_eq!(session.run(&["refresh"]).await?, exit::FAILED);
    assert_eq!(service.calls("/auth/refresh-token"), 1);
    assert_eq!(session.store().get(keys::ACCESS_TOKEN)?.as_deref(), Some("access-1"));
    Ok(())
}

#[tokio::test]
async fn logout_succeeds_when_service_is_down() -> anyhow::Result<()> {
    let service = IdentityService::start().await?;
    let session = Session::new(service.url());
    assert_eq!(session.run(&["login", "--identifier", "ada", "--secret", "pw"]).await?, exit::OK);

    service.reply("/auth/logout", 500, failure("boom"));
    assert_eq!(session.run(&["logout"]).await?, exit::OK);
    assert_eq!(session.run(&["status"]).await?, exit::DENIED);
    Ok(())
}
