//! Linked-list iteration over engine entities
//!
//! The engine walks its entity lists through a cursor variable: the head
//! expression yields the first id, and after setting the cursor to an id the
//! next expression yields the following one. An id of -1 ends the list.
//!
//! The cursor is engine-global, so an [`EntityList`] borrows the [`Engine`]
//! mutably for its whole lifetime. Nothing else can be sent on the channel
//! while a traversal is in progress, except through the list itself.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{decode, Arg, Decoded, HandleKind, Proxy};
use crate::engine::{Engine, EngineError, EngineResult};
use crate::protocol::Value;

/// Id that marks the end of an engine list
pub const END_OF_LIST: i32 = -1;

/// Engine-side names driving one list traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSpec {
    /// Expression yielding the first id
    pub head: String,
    /// Expression yielding the id after the cursor
    pub next: String,
    /// Variable holding the cursor
    pub cursor: String,
}

impl ListSpec {
    pub fn new(head: impl Into<String>, next: impl Into<String>, cursor: impl Into<String>) -> Self {
        Self {
            head: head.into(),
            next: next.into(),
            cursor: cursor.into(),
        }
    }

    /// Default names: `ball_id_head`, `ball_id_next` and `current_id` for balls,
    /// and likewise for the other kinds
    pub fn for_kind(kind: HandleKind) -> Self {
        let stem = match kind {
            HandleKind::Measurement => "meas",
            other => other.name(),
        };
        Self::new(
            format!("{}_id_head", stem),
            format!("{}_id_next", stem),
            "current_id",
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Start,
    At(i32),
    Done,
}

/// Forward-only traversal of one engine list
pub struct EntityList<'a, S> {
    engine: &'a mut Engine<S>,
    kind: HandleKind,
    spec: ListSpec,
    cursor: Cursor,
}

impl<'a, S> EntityList<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(engine: &'a mut Engine<S>, kind: HandleKind, spec: ListSpec) -> Self {
        Self {
            engine,
            kind,
            spec,
            cursor: Cursor::Start,
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn is_done(&self) -> bool {
        self.cursor == Cursor::Done
    }

    /// Advance the traversal.
    ///
    /// The head is fetched on the first call; the cursor is moved only when the
    /// following entity is requested. Any error ends the traversal.
    pub async fn next(&mut self) -> EngineResult<Option<Proxy>> {
        let result = match self.cursor {
            Cursor::Done => return Ok(None),
            Cursor::Start => {
                let head = self.spec.head.clone();
                self.fetch(&head).await
            }
            Cursor::At(id) => {
                let assignment = format!("{} = {}", self.spec.cursor, id);
                let next = self.spec.next.clone();
                match self.engine.assign(&assignment).await {
                    Ok(()) => self.fetch(&next).await,
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(id) if id == END_OF_LIST => {
                tracing::debug!("End of {} list", self.kind);
                self.cursor = Cursor::Done;
                Ok(None)
            }
            Ok(id) => {
                self.cursor = Cursor::At(id);
                Ok(Some(self.engine.proxy(self.kind, id)))
            }
            Err(e) => {
                self.cursor = Cursor::Done;
                Err(e)
            }
        }
    }

    /// Drain the rest of the list
    pub async fn collect(mut self) -> EngineResult<Vec<Proxy>> {
        let mut proxies = Vec::new();
        while let Some(proxy) = self.next().await? {
            proxies.push(proxy);
        }
        Ok(proxies)
    }

    /// Read an intrinsic of an entity while the traversal holds the engine
    pub async fn get(&mut self, proxy: &Proxy, name: &str) -> EngineResult<Decoded> {
        proxy.get(&mut *self.engine, name).await
    }

    /// Write an intrinsic of an entity while the traversal holds the engine
    pub async fn set<A: Into<Arg>>(&mut self, proxy: &Proxy, name: &str, value: A) -> EngineResult<Arg> {
        proxy.set(&mut *self.engine, name, value).await
    }

    async fn fetch(&mut self, expression: &str) -> EngineResult<i32> {
        let value = self.engine.eval(expression).await?;
        match decode(value, self.engine.channel_id())? {
            Decoded::Value(Value::Int(id)) => Ok(id),
            Decoded::Proxy(proxy) if proxy.kind() == self.kind => {
                proxy.id().ok_or_else(|| EngineError::BadHandle(proxy.to_string()))
            }
            Decoded::Null => Ok(END_OF_LIST),
            Decoded::Proxy(proxy) => Err(EngineError::BadHandle(proxy.to_string())),
            Decoded::Value(other) => Err(EngineError::UnexpectedResponse(other)),
        }
    }
}
