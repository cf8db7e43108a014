//! Per-connection input routing.
//!
//! A [`Connection`] owns its parser stack outright; it is driven by exactly
//! one task, so nothing in here is locked.

use std::collections::VecDeque;
use std::sync::Arc;

use mudproto::event::{Envelope, Event};
use mudproto::session::SessionId;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::commands::Refusal;
use crate::context::EngineContext;
use crate::entities::{Handle, object, user};
use crate::queries;

pub mod parser;
pub mod stack;

use parser::{ParserCx, Request, SessionParser};
use stack::{FrameId, ParserStack};

/// Who is on the other end, as far as the engine knows.
pub struct SessionState {
    pub sid: SessionId,
    /// The connection's `session` document.
    pub handle: Handle,
    pub user: Option<Handle>,
    pub user_level: i64,
    pub character: Option<Handle>,
    outbound: mpsc::Sender<Event>,
    closing: bool,
}

impl SessionState {
    pub async fn send(&self, ev: Event) {
        if self.outbound.send(ev).await.is_err() {
            debug!(session = %self.sid, "outbound queue closed; event dropped");
        }
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.send(Event::text(text)).await;
    }
}

fn is_word(line: &str, word: &str) -> bool {
    line == word || line.strip_prefix(word).is_some_and(|rest| rest.starts_with(' '))
}

/// `is_word` ignoring ASCII case, without copying the line.
fn is_word_ignore_case(line: &str, word: &str) -> bool {
    match line.get(..word.len()) {
        Some(head) if head.eq_ignore_ascii_case(word) => {
            let rest = &line[word.len()..];
            rest.is_empty() || rest.starts_with(' ')
        }
        _ => false,
    }
}

pub struct Connection {
    ctx: Arc<EngineContext>,
    stack: ParserStack,
    state: SessionState,
}

impl Connection {
    pub fn new(
        ctx: Arc<EngineContext>,
        sid: SessionId,
        handle: Handle,
        outbound: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            ctx,
            stack: ParserStack::default(),
            state: SessionState {
                sid,
                handle,
                user: None,
                user_level: 0,
                character: None,
                outbound,
                closing: false,
            },
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stack(&self) -> &ParserStack {
        &self.stack
    }

    pub fn is_closing(&self) -> bool {
        self.state.closing
    }

    /// Fresh connection: straight into the login parser.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        self.push_named("login", false).await
    }

    pub async fn push(&mut self, parser: Box<dyn SessionParser>, priority: bool) -> anyhow::Result<()> {
        self.apply(vec![Request::Push { parser, priority }]).await
    }

    async fn push_named(&mut self, name: &str, priority: bool) -> anyhow::Result<()> {
        let parser = self
            .ctx
            .parsers()
            .build(name)
            .ok_or_else(|| anyhow::anyhow!("no parser named {name:?}"))?;
        self.push(parser, priority).await
    }

    /// Close one frame: its close hook runs, then it is gone. Already-closed
    /// frames are ignored.
    pub async fn close_frame(&mut self, id: FrameId) -> anyhow::Result<()> {
        self.apply(vec![Request::Close(id)]).await
    }

    /// Route one line of input.
    ///
    /// Order: the nearest priority frame; then `IDLE`, `QUIT` and the
    /// privileged `_console`; then the top frame; then the played
    /// character's command queue.
    pub async fn dispatch(&mut self, line: &str) -> anyhow::Result<()> {
        if self.state.closing {
            return Ok(());
        }

        if let Some(id) = self.stack.topmost_priority() {
            return self.run_parser(id, line).await;
        }

        if is_word(line, "IDLE") {
            return Ok(());
        }
        if is_word(line, "QUIT") {
            return self.apply(vec![Request::Quit]).await;
        }
        if is_word_ignore_case(line, "_console") && self.may_use_console() {
            info!(session = %self.state.sid, "debug console opened");
            return self.push_named("console", true).await;
        }

        if let Some(id) = self.stack.top() {
            return self.run_parser(id, line).await;
        }

        self.fallback(line).await
    }

    fn may_use_console(&self) -> bool {
        self.state.user.is_some() && self.state.user_level >= self.ctx.settings().console_min_level
    }

    async fn run_parser(&mut self, id: FrameId, line: &str) -> anyhow::Result<()> {
        let Some(parser) = self.stack.get_mut(id) else {
            return Ok(());
        };
        let mut cx = ParserCx::new(&self.ctx, &self.state, id);
        let res = parser.parse(&mut cx, line).await;
        let requests = cx.into_requests();
        let name = parser.name();
        if let Err(e) = res {
            self.report(name, e).await;
        }
        self.apply(requests).await
    }

    async fn report(&self, parser: &str, err: anyhow::Error) {
        if let Some(r) = err.downcast_ref::<Refusal>() {
            self.state.send_text(r.to_string()).await;
            return;
        }
        warn!(session = %self.state.sid, parser, err = %format!("{err:#}"), "parser failed");
        self.state
            .send_text("Something went wrong handling that. It has been logged.")
            .await;
    }

    /// No parser wants the line: it becomes a command for the played
    /// character, run by the simulation task.
    async fn fallback(&mut self, line: &str) -> anyhow::Result<()> {
        let Some(character) = self.state.character.as_ref() else {
            self.state
                .send_text(format!("Oops, cannot handle: {line}"))
                .await;
            return Ok(());
        };
        self.ctx
            .query(
                queries::PUSH_PENDING_COMMAND,
                json!({ "id": character.id().as_str(), "item": line }),
            )
            .await?;
        Ok(())
    }

    async fn apply(&mut self, requests: Vec<Request>) -> anyhow::Result<()> {
        let mut queue = VecDeque::from(requests);
        while let Some(req) = queue.pop_front() {
            debug!(session = %self.state.sid, request = ?req, "stack request");
            match req {
                Request::Push { parser, priority } => {
                    let id = self.stack.push(parser, priority);
                    let Some(parser) = self.stack.get_mut(id) else {
                        continue;
                    };
                    let mut cx = ParserCx::new(&self.ctx, &self.state, id);
                    let res = parser.on_start(&mut cx).await;
                    queue.extend(cx.into_requests());
                    if let Err(e) = res {
                        let name = parser.name();
                        self.report(name, e).await;
                    }
                }
                Request::Close(id) => {
                    let Some(mut parser) = self.stack.remove(id) else {
                        continue;
                    };
                    let mut cx = ParserCx::new(&self.ctx, &self.state, id);
                    let res = parser.on_close(&mut cx).await;
                    queue.extend(cx.into_requests());
                    if let Err(e) = res {
                        self.report(parser.name(), e).await;
                    }
                }
                Request::Login(u) => {
                    self.login(u).await?;
                    let parser = self.main_menu()?;
                    queue.push_back(Request::Push {
                        parser,
                        priority: false,
                    });
                }
                Request::Logout => {
                    self.logout().await?;
                    let parser = self
                        .ctx
                        .parsers()
                        .build("login")
                        .ok_or_else(|| anyhow::anyhow!("no login parser"))?;
                    queue.push_back(Request::Push {
                        parser,
                        priority: false,
                    });
                }
                Request::Play(character) => self.play(character).await?,
                Request::Quit => {
                    self.state.send_text("Goodbye.").await;
                    self.state.closing = true;
                    queue.clear();
                }
            }
        }
        Ok(())
    }

    fn main_menu(&self) -> anyhow::Result<Box<dyn SessionParser>> {
        self.ctx
            .parsers()
            .build("main_menu")
            .ok_or_else(|| anyhow::anyhow!("no main_menu parser"))
    }

    async fn login(&mut self, u: Handle) -> anyhow::Result<()> {
        let level = user::level(&u).await?;
        let name = u.behavior().display_name(&u).await?;
        self.state.handle.set_reference("user", Some(&u)).await?;
        self.ctx.hub().set_user(self.state.sid, Some(name.clone())).await;
        info!(session = %self.state.sid, user = %name, level, "logged in");
        self.state.user = Some(u);
        self.state.user_level = level;
        Ok(())
    }

    async fn logout(&mut self) -> anyhow::Result<()> {
        self.leave_character().await?;
        self.state
            .handle
            .patch(json!({ "user": null, "character": null }))
            .await?;
        self.ctx.hub().set_user(self.state.sid, None).await;
        if let Some(u) = self.state.user.take() {
            info!(session = %self.state.sid, user = %u.id(), "logged out");
        }
        self.state.user_level = 0;
        Ok(())
    }

    async fn play(&mut self, character: Handle) -> anyhow::Result<()> {
        let Some(u) = self.state.user.clone() else {
            anyhow::bail!("play requested before login");
        };
        self.leave_character().await?;
        let room = object::join_play(&self.ctx, &character, &self.state.handle, &u).await?;
        let name = character.behavior().display_name(&character).await?;
        self.ctx
            .hub()
            .set_character(self.state.sid, Some(name.clone()), room.as_ref().map(|r| r.id().to_string()))
            .await;
        info!(session = %self.state.sid, character = %name, "playing");
        self.state.character = Some(character.clone());
        // First look happens through the normal command path.
        self.ctx
            .query(
                queries::PUSH_PENDING_COMMAND,
                json!({ "id": character.id().as_str(), "item": "look" }),
            )
            .await?;
        Ok(())
    }

    async fn leave_character(&mut self) -> anyhow::Result<()> {
        if let Some(c) = self.state.character.take() {
            object::leave_play(&c, &self.state.handle).await?;
            self.ctx.hub().set_character(self.state.sid, None, None).await;
        }
        Ok(())
    }

    /// Disconnect: close hooks run top first, the character is released and
    /// the session document removed.
    pub async fn teardown(&mut self) {
        for id in self.stack.ids() {
            if let Err(e) = self.close_frame(id).await {
                debug!(session = %self.state.sid, err = %e, "close hook failed during teardown");
            }
        }
        if let Err(e) = self.leave_character().await {
            warn!(session = %self.state.sid, err = %e, "failed to release character");
        }
        self.ctx.hub().unregister(self.state.sid).await;
        if let Err(e) = self.state.handle.delete().await {
            warn!(session = %self.state.sid, err = %e, "failed to delete session document");
        }
    }
}

/// Queue a typed line on the session document instead of dispatching it now.
pub async fn enqueue_line(ctx: &EngineContext, session: &Handle, line: &str) -> anyhow::Result<()> {
    let item = serde_json::to_value(Envelope::command(line))?;
    ctx.query(
        queries::PUSH_SESSION_INPUT,
        json!({ "id": session.id().as_str(), "item": item }),
    )
    .await?;
    Ok(())
}
