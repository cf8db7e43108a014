//! Containment edges: `_from` is the contained object, `_to` its container,
//! and the tag says how it is held.

use std::sync::Arc;

use async_trait::async_trait;

use super::{Entity, Handle};

pub const LOCATION: &str = "location";
pub const INVENTORY: &str = "inventory_location";
pub const EQUIPMENT: &str = "equipment_location";
pub const ROOM: &str = "room_location";

pub const KINDS: [&str; 4] = [LOCATION, INVENTORY, EQUIPMENT, ROOM];

pub struct LocationEntity {
    kind: &'static str,
}

pub fn location() -> Arc<dyn Entity> {
    Arc::new(LocationEntity { kind: LOCATION })
}

pub fn inventory() -> Arc<dyn Entity> {
    Arc::new(LocationEntity { kind: INVENTORY })
}

pub fn equipment() -> Arc<dyn Entity> {
    Arc::new(LocationEntity { kind: EQUIPMENT })
}

pub fn room() -> Arc<dyn Entity> {
    Arc::new(LocationEntity { kind: ROOM })
}

/// How a kind reads in a contents listing.
pub fn preposition(kind: &str) -> &'static str {
    match kind {
        INVENTORY => "carried",
        EQUIPMENT => "worn",
        ROOM => "here",
        _ => "inside",
    }
}

#[async_trait]
impl Entity for LocationEntity {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn display_name(&self, me: &Handle) -> anyhow::Result<String> {
        let from = me.get_field_as::<String>("_from").await?.unwrap_or_default();
        let to = me.get_field_as::<String>("_to").await?.unwrap_or_default();
        Ok(format!("{from} {} {to}", preposition(self.kind)))
    }
}
