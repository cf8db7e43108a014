use async_trait::async_trait;
use mudproto::event::Event;

use super::SessionState;
use super::stack::FrameId;
use crate::context::EngineContext;
use crate::entities::Handle;

/// One frame of a connection's input handling.
///
/// Parsers never touch the stack themselves: stack changes are requested
/// through [`ParserCx`] and applied by the dispatcher once the hook returns.
#[async_trait]
pub trait SessionParser: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_start(&mut self, _cx: &mut ParserCx<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn parse(&mut self, cx: &mut ParserCx<'_>, line: &str) -> anyhow::Result<()>;

    async fn on_close(&mut self, _cx: &mut ParserCx<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

pub enum Request {
    Push {
        parser: Box<dyn SessionParser>,
        priority: bool,
    },
    Close(FrameId),
    Login(Handle),
    Logout,
    Play(Handle),
    Quit,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Push { parser, priority } => write!(f, "Push({}, priority={priority})", parser.name()),
            Request::Close(id) => write!(f, "Close({id:?})"),
            Request::Login(u) => write!(f, "Login({})", u.id()),
            Request::Logout => f.write_str("Logout"),
            Request::Play(c) => write!(f, "Play({})", c.id()),
            Request::Quit => f.write_str("Quit"),
        }
    }
}

/// What a parser hook can see and ask for.
pub struct ParserCx<'a> {
    ctx: &'a EngineContext,
    state: &'a SessionState,
    frame: FrameId,
    requests: Vec<Request>,
}

impl<'a> ParserCx<'a> {
    pub(crate) fn new(ctx: &'a EngineContext, state: &'a SessionState, frame: FrameId) -> Self {
        Self {
            ctx,
            state,
            frame,
            requests: Vec::new(),
        }
    }

    pub(crate) fn into_requests(self) -> Vec<Request> {
        self.requests
    }

    pub fn ctx(&self) -> &'a EngineContext {
        self.ctx
    }

    pub fn state(&self) -> &'a SessionState {
        self.state
    }

    pub fn user(&self) -> Option<&'a Handle> {
        self.state.user.as_ref()
    }

    pub async fn send(&self, ev: Event) {
        self.state.send(ev).await;
    }

    pub async fn send_text(&self, text: impl Into<String>) {
        self.state.send(Event::text(text)).await;
    }

    /// Remove this frame once the current hook returns.
    pub fn close(&mut self) {
        self.requests.push(Request::Close(self.frame));
    }

    /// Whether this frame has already asked to be closed.
    pub fn is_closing(&self) -> bool {
        self.requests
            .iter()
            .any(|r| matches!(r, Request::Close(id) if *id == self.frame))
    }

    pub fn push(&mut self, parser: Box<dyn SessionParser>, priority: bool) {
        self.requests.push(Request::Push { parser, priority });
    }

    pub fn login(&mut self, user: Handle) {
        self.requests.push(Request::Login(user));
    }

    pub fn logout(&mut self) {
        self.requests.push(Request::Logout);
    }

    pub fn play(&mut self, character: Handle) {
        self.requests.push(Request::Play(character));
    }

    pub fn quit(&mut self) {
        self.requests.push(Request::Quit);
    }
}
