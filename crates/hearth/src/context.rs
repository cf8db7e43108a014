use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use hearth_store::collection::initialize;
use hearth_store::{CollectionSpec, DatabaseManager};
use serde_json::Value;

use crate::commands::CommandSet;
use crate::config::{Config, InputMode};
use crate::entities::{self, Collection, Handle, Store};
use crate::hub::Hub;
use crate::session::parser::SessionParser;
use crate::tasks::{self, TaskDef};

pub type ParserConstructor = fn() -> Box<dyn SessionParser>;

pub type EventHandler = for<'a> fn(
    &'a EngineContext,
    &'a Handle,
    Value,
) -> futures_util::future::BoxFuture<'a, anyhow::Result<()>>;

/// Parser name → constructor. Fixed at boot.
pub struct ParserRegistry {
    ctors: HashMap<&'static str, ParserConstructor>,
}

impl ParserRegistry {
    pub fn new(entries: &[(&'static str, ParserConstructor)]) -> Self {
        Self {
            ctors: entries.iter().copied().collect(),
        }
    }

    pub fn build(&self, name: &str) -> Option<Box<dyn SessionParser>> {
        self.ctors.get(name).map(|ctor| ctor())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut v = self.ctors.keys().copied().collect::<Vec<_>>();
        v.sort_unstable();
        v
    }
}

/// Server event name → handler. Fixed at boot.
pub struct EventRegistry {
    handlers: HashMap<&'static str, EventHandler>,
}

impl EventRegistry {
    pub fn new(entries: &[(&'static str, EventHandler)]) -> Self {
        Self {
            handlers: entries.iter().copied().collect(),
        }
    }

    pub fn get(&self, event: &str) -> Option<EventHandler> {
        self.handlers.get(event).copied()
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub input_mode: InputMode,
    pub console_min_level: i64,
    pub tick_period: Duration,
    pub session_input_interval: Duration,
    pub simulation_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_mode: InputMode::Direct,
            console_min_level: 4,
            tick_period: Duration::from_millis(100),
            session_input_interval: Duration::from_millis(100),
            simulation_interval: Duration::from_millis(250),
        }
    }
}

impl From<&Config> for Settings {
    fn from(cfg: &Config) -> Self {
        Self {
            input_mode: cfg.input_mode,
            console_min_level: cfg.console_min_level,
            tick_period: cfg.tick_period(),
            session_input_interval: cfg.session_input_interval,
            simulation_interval: cfg.simulation_interval,
        }
    }
}

/// Everything looked up by name at runtime: built once, then shared read-only.
///
/// The only mutable table reachable from here is the connection [`Hub`].
pub struct EngineContext {
    settings: Settings,
    store: Store,
    collections: HashMap<String, Collection>,
    tasks: Vec<TaskDef>,
    parsers: ParserRegistry,
    events: EventRegistry,
    commands: CommandSet,
    hub: Hub,
}

impl EngineContext {
    pub fn new(db: Arc<DatabaseManager>, settings: Settings) -> anyhow::Result<Self> {
        let registry = entities::registry().context("build proxy registry")?;
        let store = Store::new(db, Arc::new(registry));
        let collections = entities::collections()
            .into_iter()
            .map(|spec| (spec.name.clone(), Collection::new(store.clone(), spec)))
            .collect();
        Ok(Self {
            tasks: tasks::registry(&settings),
            settings,
            store,
            collections,
            parsers: crate::parsers::registry(),
            events: entities::session::events(),
            commands: crate::commands::registry(),
            hub: Hub::default(),
        })
    }

    /// Make sure every collection the engine uses exists.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let mut specs = self
            .collections
            .values()
            .map(|c| c.spec().clone())
            .collect::<Vec<CollectionSpec>>();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        initialize(&self.store, &specs)
            .await
            .context("provision collections")?;
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn collection(&self, name: &str) -> anyhow::Result<&Collection> {
        self.collections
            .get(name)
            .with_context(|| format!("no collection named {name:?}"))
    }

    pub fn collection_names(&self) -> Vec<&str> {
        let mut v = self.collections.keys().map(String::as_str).collect::<Vec<_>>();
        v.sort_unstable();
        v
    }

    pub fn tasks(&self) -> &[TaskDef] {
        &self.tasks
    }

    pub fn parsers(&self) -> &ParserRegistry {
        &self.parsers
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Run one fixed statement to completion.
    pub async fn query(&self, statement: &str, bindings: Value) -> anyhow::Result<Vec<Value>> {
        Ok(self.store.db().query(statement, bindings).await?)
    }

    pub async fn query_proxy(&self, statement: &str, bindings: Value) -> anyhow::Result<Vec<Handle>> {
        Ok(self.store.query_proxy(statement, bindings).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::EngineContext;
    use crate::testutil;

    #[test]
    fn context_is_shared_read_only_state() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EngineContext>();
    }

    #[tokio::test]
    async fn boot_registries_are_complete() {
        let (fake, ctx) = testutil::engine().await;
        assert_eq!(
            ctx.collection_names(),
            vec!["location", "object", "playview", "session", "user"]
        );
        for name in ctx.collection_names() {
            assert!(fake.with_state(|s| s.has_collection(name)), "{name} provisioned");
        }
        assert_eq!(ctx.parsers().names(), vec!["console", "login", "main_menu"]);
        assert!(ctx.events().get("Command").is_some());
        assert!(ctx.events().get("GMCP").is_some());
        assert!(ctx.events().get("Dance").is_none());
        let tags = ctx.store().registry().tags();
        for tag in [
            "character",
            "equipment_location",
            "inventory_location",
            "location",
            "object",
            "playview",
            "room",
            "room_location",
            "session",
            "user",
        ] {
            assert!(tags.contains(&tag), "{tag} registered");
        }
        let task_names = ctx.tasks().iter().map(|t| t.name).collect::<Vec<_>>();
        assert_eq!(task_names, vec!["session_input", "simulation_commands"]);
        assert!(ctx.collection("nowhere").is_err());
    }

    #[tokio::test]
    async fn initialize_twice_creates_nothing_new() {
        let (fake, ctx) = testutil::engine().await;
        fake.clear_requests();
        ctx.initialize().await.unwrap();
        let creates = fake
            .requests()
            .into_iter()
            .filter(|(m, p)| m == "POST" && p.ends_with("/_api/collection"))
            .count();
        assert_eq!(creates, 0);
    }
}
