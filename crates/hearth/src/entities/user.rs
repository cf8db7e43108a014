use std::sync::Arc;

use argon2::Argon2;
use async_trait::async_trait;
use hearth_store::StoreError;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde_json::json;
use tracing::{info, warn};

use super::{Entity, Handle};
use crate::commands::Refusal;
use crate::context::EngineContext;
use crate::queries;

/// Level granted to the very first account.
pub const SUPERUSER_LEVEL: i64 = 5;

pub struct UserEntity;

pub fn user() -> Arc<dyn Entity> {
    Arc::new(UserEntity)
}

#[async_trait]
impl Entity for UserEntity {
    fn kind(&self) -> &'static str {
        "user"
    }

    async fn display_name(&self, me: &Handle) -> anyhow::Result<String> {
        Ok(me
            .get_field_as::<String>("username")
            .await?
            .unwrap_or_else(|| me.id().to_string()))
    }
}

pub fn valid_name(name: &str) -> bool {
    (2..=20).contains(&name.chars().count()) && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Case-insensitive lookup.
pub async fn find_user(ctx: &EngineContext, username: &str) -> anyhow::Result<Option<Handle>> {
    let found = ctx
        .query_proxy(
            queries::FIND_USER,
            json!({ "username": username.trim().to_lowercase() }),
        )
        .await?;
    Ok(found.into_iter().next())
}

/// Document key for a user or character name: names are unique ignoring case.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Character documents share the object collection with the rest of the world.
pub fn character_key(name: &str) -> String {
    format!("character-{}", name_key(name))
}

/// The store refuses a second document under a taken key.
fn taken(e: StoreError, msg: String) -> anyhow::Error {
    match e {
        StoreError::Validation(_) => Refusal::new(msg).into(),
        e => e.into(),
    }
}

/// New account with an argon2 password hash. The first account ever created
/// is a superuser; the returned flag says whether this was it.
pub async fn create_user(ctx: &EngineContext, username: &str, password: &str) -> anyhow::Result<(Handle, bool)> {
    let username = username.trim();
    if !valid_name(username) {
        return Err(Refusal::new("Usernames are 2-20 letters, digits or underscores.").into());
    }
    let taken_msg = format!("The name {username} is already taken.");
    if find_user(ctx, username).await?.is_some() {
        return Err(Refusal::new(taken_msg).into());
    }

    let salt = SaltString::generate(&mut password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash_password failed: {e}"))?
        .to_string();

    let users = ctx.collection("user")?;
    let maybe_first = users.count().await? == 0;
    let u = users
        .create_proxy(
            json!({
                "username": username,
                "password_hash": hash,
                "level": 0,
                "created_at": chrono::Utc::now().to_rfc3339(),
            }),
            Some(&name_key(username)),
        )
        .await
        .map_err(|e| taken(e, taken_msg))?;
    let first = maybe_first && claim_superuser(ctx, &u).await?;
    info!(user = %username, superuser = first, "account created");
    Ok((u, first))
}

/// Grant superuser to `u` unless some account already has it. At most one
/// of several racing first sign-ups wins.
pub async fn claim_superuser(ctx: &EngineContext, u: &Handle) -> anyhow::Result<bool> {
    let claimed = ctx
        .query(
            queries::CLAIM_SUPERUSER,
            json!({ "id": u.id().as_str(), "level": SUPERUSER_LEVEL }),
        )
        .await?;
    Ok(!claimed.is_empty())
}

pub async fn authenticate(u: &Handle, password: &str) -> anyhow::Result<bool> {
    let Some(phc) = u.get_field_as::<String>("password_hash").await? else {
        return Ok(false);
    };
    let Ok(parsed) = PasswordHash::new(&phc) else {
        warn!(user = %u.id(), "bad password hash format");
        return Ok(false);
    };
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

pub async fn level(u: &Handle) -> anyhow::Result<i64> {
    Ok(u.get_field_as::<i64>("level").await?.unwrap_or(0))
}

/// The user's characters, by name.
pub async fn characters(ctx: &EngineContext, u: &Handle) -> anyhow::Result<Vec<Handle>> {
    ctx.query_proxy(queries::USER_CHARACTERS, json!({ "user": u.id().as_str() }))
        .await
}

pub async fn create_character(ctx: &EngineContext, u: &Handle, name: &str) -> anyhow::Result<Handle> {
    let name = name.trim();
    if !valid_name(name) || !name.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(Refusal::new("Character names are 2-20 letters.").into());
    }
    let taken_msg = format!("Someone already goes by {name}.");
    let existing = ctx
        .query(queries::FIND_CHARACTER, json!({ "name": name_key(name) }))
        .await?;
    if !existing.is_empty() {
        return Err(Refusal::new(taken_msg).into());
    }
    let mut display = name.to_lowercase();
    if let Some(first) = display.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    let c = ctx
        .collection("object")?
        .create_proxy(
            json!({
                "proxy": "character",
                "name": display,
                "description": format!("{display} looks like they just arrived."),
                "user_id": u.id().as_str(),
                "pending_commands": [],
            }),
            Some(&character_key(name)),
        )
        .await
        .map_err(|e| taken(e, taken_msg))?;
    info!(user = %u.id(), character = %c.id(), "character created");
    Ok(c)
}
