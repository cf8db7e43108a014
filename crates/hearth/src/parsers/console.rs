//! Privileged inspection of live state. Runs as a priority frame, so it sees
//! every line until `exit`.

use async_trait::async_trait;
use hearth_store::DocumentId;
use serde_json::Value;
use tracing::info;

use crate::commands::Refusal;
use crate::session::parser::{ParserCx, SessionParser};

const HELP: &str = "console: get <id> | count <collection> | tasks | proxies | who | exit";

/// Fields never echoed back.
const REDACTED: [&str; 1] = ["password_hash"];

pub struct Console;

pub fn console() -> Box<dyn SessionParser> {
    Box::new(Console)
}

fn redact(mut doc: Value) -> Value {
    if let Value::Object(m) = &mut doc {
        for k in REDACTED {
            if m.contains_key(k) {
                m.insert(k.to_string(), Value::String("<redacted>".to_string()));
            }
        }
    }
    doc
}

impl Console {
    async fn get(&self, cx: &ParserCx<'_>, raw: &str) -> anyhow::Result<()> {
        let id = DocumentId::parse(raw).map_err(|_| Refusal::new(format!("{raw:?} is not a document id.")))?;
        let doc = match cx.ctx().store().db().get_document(&id).await {
            Ok(doc) => doc,
            Err(e) if e.is_not_found() => return Err(Refusal::new(format!("No document {id}.")).into()),
            Err(e) => return Err(e.into()),
        };
        cx.send_text(serde_json::to_string_pretty(&redact(doc))?).await;
        Ok(())
    }

    async fn count(&self, cx: &ParserCx<'_>, name: &str) -> anyhow::Result<()> {
        let coll = cx
            .ctx()
            .collection(name)
            .map_err(|_| Refusal::new(format!("No collection {name:?}. Known: {}", cx.ctx().collection_names().join(", "))))?;
        let n = coll.count().await?;
        cx.send_text(format!("{name}: {n}")).await;
        Ok(())
    }

    async fn tasks(&self, cx: &ParserCx<'_>) {
        let lines = cx
            .ctx()
            .tasks()
            .iter()
            .map(|t| format!("{} every {}ms", t.name, t.interval.as_millis()))
            .collect::<Vec<_>>();
        cx.send_text(lines.join("\r\n")).await;
    }

    async fn who(&self, cx: &ParserCx<'_>) {
        let online = cx.ctx().hub().online().await;
        let mut lines = vec![format!("{} connected", online.len())];
        for o in online {
            lines.push(format!(
                "{} user={} character={} since={}",
                o.session.short(),
                o.user.as_deref().unwrap_or("-"),
                o.character.as_deref().unwrap_or("-"),
                o.connected_at.format("%H:%M:%S"),
            ));
        }
        cx.send_text(lines.join("\r\n")).await;
    }
}

#[async_trait]
impl SessionParser for Console {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn on_start(&mut self, cx: &mut ParserCx<'_>) -> anyhow::Result<()> {
        cx.send_text(HELP).await;
        Ok(())
    }

    async fn parse(&mut self, cx: &mut ParserCx<'_>, line: &str) -> anyhow::Result<()> {
        let line = line.trim();
        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((w, rest)) => (w, rest.trim()),
            None => (line, ""),
        };
        match (word, arg) {
            ("get", id) if !id.is_empty() => self.get(cx, id).await?,
            ("count", name) if !name.is_empty() => self.count(cx, name).await?,
            ("tasks", _) => self.tasks(cx).await,
            ("proxies", _) => {
                let tags = cx.ctx().store().registry().tags().join(" ");
                cx.send_text(tags).await;
            }
            ("who", _) => self.who(cx).await,
            ("exit", _) => {
                info!(session = %cx.state().sid, "debug console closed");
                cx.send_text("Console closed.").await;
                cx.close();
            }
            _ => cx.send_text(HELP).await,
        }
        Ok(())
    }
}
