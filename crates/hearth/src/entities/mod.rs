//! Behaviors selected by a record's `proxy` tag.
//!
//! A handle is `DocumentProxy<dyn Entity>`: the record's id, plus the behavior
//! built from its tag. Re-typing an entity swaps that behavior and rewrites
//! the tag; nothing about the stored shape changes.

use async_trait::async_trait;
use hearth_store::{CollectionManager, CollectionSpec, DocumentProxy, ProxyRegistry, ProxyStore};
use serde_json::Value;

use crate::context::EngineContext;

pub mod location;
pub mod object;
pub mod playview;
pub mod session;
pub mod user;

pub type Handle = DocumentProxy<dyn Entity>;
pub type Store = ProxyStore<dyn Entity>;
pub type Collection = CollectionManager<dyn Entity>;

#[async_trait]
pub trait Entity: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    /// One `(event, payload)` item from a session's input queue.
    async fn execute_event(
        &self,
        _ctx: &EngineContext,
        me: &Handle,
        event: &str,
        _payload: Value,
    ) -> anyhow::Result<()> {
        anyhow::bail!("{} {} does not take events (got {event})", self.kind(), me.id())
    }

    /// One line from an entity's `pending_commands`.
    async fn execute_command(
        &self,
        _ctx: &EngineContext,
        me: &Handle,
        _line: &str,
    ) -> anyhow::Result<()> {
        anyhow::bail!("{} {} does not take commands", self.kind(), me.id())
    }

    async fn display_name(&self, me: &Handle) -> anyhow::Result<String> {
        Ok(match me.get_field_as::<String>("name").await? {
            Some(n) if !n.trim().is_empty() => n,
            _ => me.id().to_string(),
        })
    }

    /// What `viewer` sees when looking at this entity.
    async fn render_appearance(
        &self,
        _ctx: &EngineContext,
        me: &Handle,
        _viewer: &Handle,
    ) -> anyhow::Result<String> {
        let name = self.display_name(me).await?;
        Ok(match me.get_field_as::<String>("description").await? {
            Some(d) if !d.trim().is_empty() => format!("{name}\r\n{d}"),
            _ => name,
        })
    }
}

pub fn registry() -> hearth_store::Result<ProxyRegistry<dyn Entity>> {
    Ok(ProxyRegistry::<dyn Entity>::builder()
        .register("session", session::session)?
        .register("user", user::user)?
        .register("object", object::object)?
        .register("character", object::character)?
        .register("room", object::room)?
        .register("location", location::location)?
        .register("inventory_location", location::inventory)?
        .register("equipment_location", location::equipment)?
        .register("room_location", location::room)?
        .register("playview", playview::playview)?
        .build())
}

pub fn collections() -> Vec<CollectionSpec> {
    vec![
        CollectionSpec::document("user"),
        CollectionSpec::document("session"),
        CollectionSpec::document("object"),
        CollectionSpec::edge("location"),
        CollectionSpec::edge("playview"),
    ]
}

/// Fresh handle on a document id obtained from a field or query.
pub async fn resolve(ctx: &EngineContext, id: &str) -> anyhow::Result<Handle> {
    let id = hearth_store::DocumentId::parse(id)?;
    Ok(ctx.store().get_document(&id).await?)
}

pub fn same(a: &Handle, b: &Handle) -> bool {
    a.id() == b.id()
}
