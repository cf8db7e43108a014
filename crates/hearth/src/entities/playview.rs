use std::sync::Arc;

use async_trait::async_trait;

use super::Entity;

/// Edge from a user to a character they have played.
pub struct PlayviewEntity;

pub fn playview() -> Arc<dyn Entity> {
    Arc::new(PlayviewEntity)
}

#[async_trait]
impl Entity for PlayviewEntity {
    fn kind(&self) -> &'static str {
        "playview"
    }
}
