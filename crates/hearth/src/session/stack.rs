use super::parser::SessionParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

struct Frame {
    id: FrameId,
    priority: bool,
    parser: Box<dyn SessionParser>,
}

/// A connection's parsers, bottom first. Frames are addressed by id, so a
/// stale id can never remove some other frame.
#[derive(Default)]
pub struct ParserStack {
    frames: Vec<Frame>,
    next_id: u64,
}

impl ParserStack {
    pub fn push(&mut self, parser: Box<dyn SessionParser>, priority: bool) -> FrameId {
        self.next_id += 1;
        let id = FrameId(self.next_id);
        self.frames.push(Frame {
            id,
            priority,
            parser,
        });
        id
    }

    /// Take exactly one frame out. `None` if it was already gone.
    pub fn remove(&mut self, id: FrameId) -> Option<Box<dyn SessionParser>> {
        let pos = self.frames.iter().position(|f| f.id == id)?;
        Some(self.frames.remove(pos).parser)
    }

    pub fn top(&self) -> Option<FrameId> {
        self.frames.last().map(|f| f.id)
    }

    /// Nearest priority frame, searching down from the top.
    pub fn topmost_priority(&self) -> Option<FrameId> {
        self.frames.iter().rev().find(|f| f.priority).map(|f| f.id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Box<dyn SessionParser>> {
        self.frames
            .iter_mut()
            .find(|f| f.id == id)
            .map(|f| &mut f.parser)
    }

    pub fn contains(&self, id: FrameId) -> bool {
        self.frames.iter().any(|f| f.id == id)
    }

    /// Frame ids, top first.
    pub fn ids(&self) -> Vec<FrameId> {
        self.frames.iter().rev().map(|f| f.id).collect()
    }

    /// Parser names, bottom first.
    pub fn names(&self) -> Vec<&'static str> {
        self.frames.iter().map(|f| f.parser.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
