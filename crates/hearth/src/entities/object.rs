//! Things in the world: plain objects, characters and rooms share one
//! collection and differ only by tag.

use std::sync::Arc;

use async_trait::async_trait;
use hearth_store::DocumentId;
use mudproto::event::Event;
use serde_json::{Value, json};
use tracing::info;

use super::{Entity, Handle, location, resolve, same};
use crate::context::EngineContext;
use crate::queries;

pub const OBJECT: &str = "object";
pub const CHARACTER: &str = "character";
pub const ROOM: &str = "room";

pub const DEFAULT_ROOM_NAME: &str = "The Hearth";
const DEFAULT_ROOM_DESCRIPTION: &str =
    "A low stone room around a banked fire. It is warm here, and quiet.";

pub struct ObjectEntity {
    kind: &'static str,
}

pub fn object() -> Arc<dyn Entity> {
    Arc::new(ObjectEntity { kind: OBJECT })
}

pub fn character() -> Arc<dyn Entity> {
    Arc::new(ObjectEntity { kind: CHARACTER })
}

pub fn room() -> Arc<dyn Entity> {
    Arc::new(ObjectEntity { kind: ROOM })
}

#[async_trait]
impl Entity for ObjectEntity {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn execute_command(&self, ctx: &EngineContext, me: &Handle, line: &str) -> anyhow::Result<()> {
        crate::commands::execute(ctx, me, line).await
    }

    async fn render_appearance(&self, ctx: &EngineContext, me: &Handle, viewer: &Handle) -> anyhow::Result<String> {
        let name = self.display_name(me).await?;
        let mut out = name;
        if let Some(d) = me.get_field_as::<String>("description").await? {
            if !d.trim().is_empty() {
                out.push_str("\r\n");
                out.push_str(&d);
            }
        }
        if self.kind != ROOM {
            return Ok(out);
        }

        let mut here = Vec::new();
        for (obj, kind) in contents(ctx, me).await? {
            if same(&obj, viewer) || kind != location::ROOM {
                continue;
            }
            here.push(obj.behavior().display_name(&obj).await?);
        }
        if !here.is_empty() {
            out.push_str("\r\nAlso here: ");
            out.push_str(&here.join(", "));
            out.push('.');
        }
        Ok(out)
    }
}

/// The session document currently playing `obj`, if any.
pub async fn session_of(obj: &Handle) -> anyhow::Result<Option<DocumentId>> {
    match obj.get_field_as::<String>("session").await? {
        Some(raw) => Ok(Some(DocumentId::parse(&raw)?)),
        None => Ok(None),
    }
}

/// Send a line to whoever is playing `obj`. `false` when nobody is.
pub async fn send_text(ctx: &EngineContext, obj: &Handle, text: impl Into<String>) -> anyhow::Result<bool> {
    let Some(session) = session_of(obj).await? else {
        return Ok(false);
    };
    Ok(ctx.hub().send_to_session(&session, Event::text(text)).await)
}

/// `obj`'s location edge.
pub async fn location_of(obj: &Handle) -> anyhow::Result<Option<Handle>> {
    Ok(obj.get_proxy("location").await?)
}

pub async fn container_of(ctx: &EngineContext, obj: &Handle) -> anyhow::Result<Option<Handle>> {
    let Some(edge) = location_of(obj).await? else {
        return Ok(None);
    };
    match edge.get_field_as::<String>("_to").await? {
        Some(to) => Ok(Some(resolve(ctx, &to).await?)),
        None => Ok(None),
    }
}

/// Everything held by `container`, with how it is held.
pub async fn contents(ctx: &EngineContext, container: &Handle) -> anyhow::Result<Vec<(Handle, String)>> {
    let rows = ctx
        .query(queries::CONTENTS, json!({ "container": container.id().as_str() }))
        .await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(record) = row.get("object").filter(|v| !v.is_null()) else {
            continue;
        };
        let kind = row
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or(location::LOCATION)
            .to_string();
        out.push((ctx.store().get_proxy(record)?, kind));
    }
    Ok(out)
}

/// Put `obj` into `container`. An existing edge is rewritten in place so the
/// object is never in two places at once.
pub async fn add_object_location(
    ctx: &EngineContext,
    container: &Handle,
    obj: &Handle,
    kind: &str,
) -> anyhow::Result<Handle> {
    anyhow::ensure!(location::KINDS.contains(&kind), "unknown location kind {kind:?}");
    let edge = json!({
        "_from": obj.id().as_str(),
        "_to": container.id().as_str(),
        "proxy": kind,
    });

    if let Some(mut existing) = location_of(obj).await? {
        existing.replace(edge).await?;
        existing.change_proxy(kind, false).await?;
        return Ok(existing);
    }

    let created = ctx.collection("location")?.create_proxy(edge, None).await?;
    obj.set_reference("location", Some(&created)).await?;
    Ok(created)
}

pub async fn remove_from_location(obj: &Handle) -> anyhow::Result<()> {
    if let Some(edge) = location_of(obj).await? {
        edge.delete().await?;
    }
    obj.set_reference("location", None).await?;
    Ok(())
}

/// The room new arrivals land in, created on first use.
pub async fn starting_room(ctx: &EngineContext) -> anyhow::Result<Handle> {
    if let Some(room) = ctx
        .query_proxy(queries::FIRST_ROOM, json!({}))
        .await?
        .into_iter()
        .next()
    {
        return Ok(room);
    }
    let room = ctx
        .collection("object")?
        .create_proxy(
            json!({
                "proxy": ROOM,
                "name": DEFAULT_ROOM_NAME,
                "description": DEFAULT_ROOM_DESCRIPTION,
            }),
            None,
        )
        .await?;
    info!(room = %room.id(), "created starting room");
    Ok(room)
}

/// Bind `character` to a session and put it in the world. Returns the room it
/// is standing in.
pub async fn join_play(
    ctx: &EngineContext,
    character: &Handle,
    session: &Handle,
    user: &Handle,
) -> anyhow::Result<Option<Handle>> {
    if character.get_field("playview").await?.is_none() {
        let view = ctx
            .collection("playview")?
            .create_proxy(
                json!({ "_from": user.id().as_str(), "_to": character.id().as_str() }),
                None,
            )
            .await?;
        character.set_reference("playview", Some(&view)).await?;
    }
    character.set_reference("session", Some(session)).await?;
    session.set_reference("character", Some(character)).await?;

    let room = match container_of(ctx, character).await? {
        Some(c) if c.tag() == ROOM => c,
        _ => starting_room(ctx).await?,
    };
    add_object_location(ctx, &room, character, location::ROOM).await?;
    Ok(Some(room))
}

/// Undo [`join_play`]: the character leaves the room and is unbound from the
/// session.
pub async fn leave_play(character: &Handle, session: &Handle) -> anyhow::Result<()> {
    remove_from_location(character).await?;
    let bound = character.get_field_as::<String>("session").await?;
    if bound.as_deref() == Some(session.id().as_str()) {
        character.set_reference("session", None).await?;
    }
    session.set_reference("character", None).await?;
    Ok(())
}
