//! Entity commands: what a played character can do once its line has left
//! the parser stack.
//!
//! A command is matched on its first word. Each key has a minimum length, so
//! `l`, `lo` and `look` all reach `look`. Commands are tried in priority
//! order and the first match runs.

use std::fmt;

use async_trait::async_trait;

use crate::context::EngineContext;
use crate::entities::{Handle, object};

mod informative;
mod social;

pub const NO_MATCH: &str = "Huh? (Type \"help\" for help.)";

/// An error meant for the user: shown as-is instead of being logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refusal(pub String);

impl Refusal {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Refusal {}

/// One matched command line.
pub struct Invocation<'a> {
    pub ctx: &'a EngineContext,
    pub caller: &'a Handle,
    pub cmdstring: &'a str,
    pub key: &'static str,
    pub args: &'a str,
}

impl Invocation<'_> {
    pub async fn reply(&self, text: impl Into<String>) -> anyhow::Result<()> {
        object::send_text(self.ctx, self.caller, text).await?;
        Ok(())
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    /// `(key, minimum typed length)` pairs.
    fn keys(&self) -> &'static [(&'static str, usize)];

    fn name(&self) -> &'static str {
        self.keys().first().map(|(k, _)| *k).unwrap_or("")
    }

    fn priority(&self) -> i32 {
        0
    }

    fn help_category(&self) -> &'static str {
        "general"
    }

    fn help(&self) -> &'static str;

    fn available(&self, _caller: &Handle) -> bool {
        true
    }

    async fn run(&self, inv: &Invocation<'_>) -> anyhow::Result<()>;
}

/// Does typed `word` select `key`?
pub fn matches(word: &str, key: &str, min: usize) -> bool {
    word.len() >= min.max(1) && key.starts_with(word)
}

pub struct CommandSet {
    commands: Vec<Box<dyn Command>>,
}

impl CommandSet {
    pub fn new(mut commands: Vec<Box<dyn Command>>) -> Self {
        commands.sort_by_key(|c| std::cmp::Reverse(c.priority()));
        Self { commands }
    }

    pub fn find(&self, caller: &Handle, word: &str) -> Option<(&dyn Command, &'static str)> {
        let word = word.to_lowercase();
        self.commands
            .iter()
            .filter(|c| c.available(caller))
            .find_map(|c| {
                c.keys()
                    .iter()
                    .find(|(key, min)| matches(&word, key, *min))
                    .map(|(key, _)| (c.as_ref(), *key))
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Command> {
        self.commands.iter().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

pub fn registry() -> CommandSet {
    CommandSet::new(vec![
        Box::new(informative::Look),
        Box::new(informative::Who),
        Box::new(informative::Help),
        Box::new(social::Say),
    ])
}

/// Run one command line as `caller`. Refusals go back to the caller; other
/// failures are returned for the caller's task to log.
pub async fn execute(ctx: &EngineContext, caller: &Handle, line: &str) -> anyhow::Result<()> {
    let line = line.trim();
    let (word, args) = match line.split_once(char::is_whitespace) {
        Some((w, rest)) => (w, rest.trim()),
        None => (line, ""),
    };
    if word.is_empty() {
        return Ok(());
    }

    let Some((cmd, key)) = ctx.commands().find(caller, word) else {
        object::send_text(ctx, caller, NO_MATCH).await?;
        return Ok(());
    };
    let inv = Invocation {
        ctx,
        caller,
        cmdstring: word,
        key,
        args,
    };
    match cmd.run(&inv).await {
        Ok(()) => Ok(()),
        Err(e) => match e.downcast_ref::<Refusal>() {
            Some(r) => {
                object::send_text(ctx, caller, r.to_string()).await?;
                Ok(())
            }
            None => Err(e.context(format!("command {:?} for {}", cmd.name(), caller.id()))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{NO_MATCH, execute, matches};
    use crate::testutil;

    #[test]
    fn prefixes_need_the_minimum_length() {
        assert!(matches("l", "look", 1));
        assert!(matches("look", "look", 1));
        assert!(!matches("looks", "look", 1));
        assert!(!matches("w", "whisper", 2));
        assert!(matches("wh", "whisper", 2));
        assert!(!matches("", "look", 0));
    }

    #[tokio::test]
    async fn commands_resolve_by_priority_and_prefix() {
        let (_fake, ctx) = testutil::engine().await;
        let mut p = testutil::playing(&ctx, "Ann", "Zed").await;

        let (cmd, key) = ctx.commands().find(&p.character, "L").unwrap();
        assert_eq!((cmd.name(), key), ("look", "look"));
        let (cmd, _) = ctx.commands().find(&p.character, "?").unwrap();
        assert_eq!(cmd.name(), "help");
        assert!(ctx.commands().find(&p.character, "dance").is_none());

        execute(&ctx, &p.character, "dance wildly").await.unwrap();
        assert_eq!(p.next_text().await, NO_MATCH);
        execute(&ctx, &p.character, "   ").await.unwrap();
        assert!(p.try_text().is_none());
    }

    #[tokio::test]
    async fn refusals_are_shown_to_the_caller() {
        let (_fake, ctx) = testutil::engine().await;
        let mut p = testutil::playing(&ctx, "Ann", "Zed").await;
        execute(&ctx, &p.character, "say").await.unwrap();
        assert_eq!(p.next_text().await, "Say what?");
    }
}
