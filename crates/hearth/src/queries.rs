//! Every statement the engine sends to the store. Fixed text, values only
//! through bind parameters.

/// Atomically take every session's queued input, leaving it empty.
pub const DRAIN_SESSION_INPUT: &str = "FOR doc IN session \
    FILTER LENGTH(doc.input) > 0 \
    LET items = doc.input \
    UPDATE doc WITH { input: [], last_activity: DATE_NOW() } IN session \
    RETURN [doc._id, items, doc.proxy]";

/// Atomically take every object's pending commands, leaving them empty.
pub const DRAIN_PENDING_COMMANDS: &str = "FOR doc IN object \
    FILTER LENGTH(doc.pending_commands) > 0 \
    LET items = doc.pending_commands \
    UPDATE doc WITH { pending_commands: [], last_activity: DATE_NOW() } IN object \
    RETURN [doc._id, items, doc.proxy]";

/// Append one `[event, payload]` item to a session's input, store-side.
pub const PUSH_SESSION_INPUT: &str = "FOR doc IN session \
    FILTER doc._id == @id \
    UPDATE doc WITH { input: PUSH(NOT_NULL(doc.input, []), @item) } IN session \
    RETURN doc._id";

/// Append one command line to an object's pending commands, store-side.
pub const PUSH_PENDING_COMMAND: &str = "FOR doc IN object \
    FILTER doc._id == @id \
    UPDATE doc WITH { pending_commands: PUSH(NOT_NULL(doc.pending_commands, []), @item) } IN object \
    RETURN doc._id";

pub const FIND_USER: &str = "FOR doc IN user \
    FILTER LOWER(doc.username) == @username \
    LIMIT 1 \
    RETURN doc";

/// Raise `@id` to `@level` only while no account holds that level yet.
pub const CLAIM_SUPERUSER: &str = "LET holders = (FOR u IN user FILTER u.level >= @level LIMIT 1 RETURN u._id) \
    FOR doc IN user \
    FILTER doc._id == @id AND LENGTH(holders) == 0 \
    UPDATE doc WITH { level: @level } IN user \
    RETURN doc._id";

pub const USER_CHARACTERS: &str = "FOR doc IN object \
    FILTER doc.user_id == @user \
    SORT doc.name \
    RETURN doc";

pub const FIND_CHARACTER: &str = "FOR doc IN object \
    FILTER doc.proxy == \"character\" AND LOWER(doc.name) == @name \
    LIMIT 1 \
    RETURN doc";

/// Objects whose location edge points at `@container`, with the edge's kind.
pub const CONTENTS: &str = "FOR edge IN location \
    FILTER edge._to == @container \
    RETURN { object: DOCUMENT(edge._from), kind: edge.proxy }";

pub const FIRST_ROOM: &str = "FOR doc IN object \
    FILTER doc.proxy == \"room\" \
    SORT doc._key \
    LIMIT 1 \
    RETURN doc";
