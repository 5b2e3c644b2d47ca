//! Proxy module - Local stand-ins for remote engine entities
//!
//! Every EVAL result passes through [`decode`]: a Text value carrying a handle
//! sentinel becomes a [`Proxy`], `:null:` becomes [`Decoded::Null`], anything
//! else is returned unchanged. A proxy is only a capability to address an
//! entity; it holds no engine state and is bound to the channel that produced it.

mod handle;
mod intrinsics;
mod list;

pub use handle::*;
pub use intrinsics::*;
pub use list::*;

use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::engine::{Engine, EngineError, EngineResult};
use crate::network::ChannelId;
use crate::protocol::Value;

/// How a proxy names its entity in expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Looked up through the kind's finder, e.g. `find_ball(7)`
    Id(i32),
    /// Any expression that evaluates to the entity
    Expr(String),
}

/// Reference to one remote entity over one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    kind: HandleKind,
    address: Address,
    channel: ChannelId,
}

impl Proxy {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Entity id, when the proxy was built from one
    pub fn id(&self) -> Option<i32> {
        match self.address {
            Address::Id(id) => Some(id),
            Address::Expr(_) => None,
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Expression that evaluates to this entity on the engine side
    pub fn address(&self) -> String {
        match &self.address {
            Address::Id(id) => KindSpec::for_kind(self.kind).find(*id),
            Address::Expr(expr) => expr.clone(),
        }
    }

    /// Read an intrinsic, e.g. `rad` sends EVAL `b_rad(find_ball(7))`
    pub async fn get<S>(&self, engine: &mut Engine<S>, name: &str) -> EngineResult<Decoded>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        engine.check_proxy(self)?;
        let expression = KindSpec::for_kind(self.kind).read_expression(name, &self.address())?;
        engine.eval_decoded(&expression).await
    }

    /// Write an intrinsic and hand the argument back.
    ///
    /// The engine's acknowledgement is not inspected; the write is assumed to
    /// have taken effect.
    pub async fn set<S, A>(&self, engine: &mut Engine<S>, name: &str, value: A) -> EngineResult<Arg>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        A: Into<Arg>,
    {
        engine.check_proxy(self)?;
        let value = value.into();
        let literal = engine.render(&value)?;
        let expression =
            KindSpec::for_kind(self.kind).write_expression(name, &self.address(), &literal)?;
        engine.assign(&expression).await?;
        Ok(value)
    }

    /// Follow the entity's `next` intrinsic; None at the end of the engine list
    pub async fn next<S>(&self, engine: &mut Engine<S>) -> EngineResult<Option<Proxy>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.get(engine, "next").await? {
            Decoded::Proxy(proxy) => Ok(Some(proxy)),
            Decoded::Null => Ok(None),
            Decoded::Value(Value::Int(id)) if id < 0 => Ok(None),
            Decoded::Value(Value::Int(id)) => Ok(Some(Proxy {
                kind: self.kind,
                address: Address::Id(id),
                channel: self.channel,
            })),
            Decoded::Value(other) => Err(EngineError::UnexpectedResponse(other)),
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.address {
            Address::Id(id) => write!(f, "<{} {}>", self.kind, id),
            Address::Expr(expr) => write!(f, "<{} {}>", self.kind, expr),
        }
    }
}

/// An EVAL result after handle decoding
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Value(Value),
    Proxy(Proxy),
    Null,
}

impl Decoded {
    pub fn into_value(self) -> Option<Value> {
        match self {
            Decoded::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_proxy(self) -> Option<Proxy> {
        match self {
            Decoded::Proxy(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Decoded::Null)
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Value(v) => write!(f, "{}", v),
            Decoded::Proxy(p) => write!(f, "{}", p),
            Decoded::Null => f.write_str(NULL_SENTINEL),
        }
    }
}

/// Argument of a remote call or intrinsic write
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(Value),
    Proxy(Proxy),
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

macro_rules! arg_from {
    ($($t:ty),*) => {
        $(impl From<$t> for Arg {
            fn from(v: $t) -> Self {
                Arg::Value(Value::from(v))
            }
        })*
    };
}

arg_from!(i32, f64, bool, &str, String, [f64; 2], [f64; 3]);

impl From<Proxy> for Arg {
    fn from(p: Proxy) -> Self {
        Arg::Proxy(p)
    }
}

impl From<&Proxy> for Arg {
    fn from(p: &Proxy) -> Self {
        Arg::Proxy(p.clone())
    }
}

/// Decode handles in a value received on `channel`
pub fn decode(value: Value, channel: ChannelId) -> EngineResult<Decoded> {
    let text = match value {
        Value::Text(text) => text,
        other => return Ok(Decoded::Value(other)),
    };

    match parse_handle(&text).map_err(EngineError::BadHandle)? {
        Some(ParsedHandle::Entity(handle)) => Ok(Decoded::Proxy(Proxy {
            kind: handle.kind,
            address: Address::Id(handle.id),
            channel,
        })),
        Some(ParsedHandle::Null) => Ok(Decoded::Null),
        None => Ok(Decoded::Value(Value::Text(text))),
    }
}

impl<S> Engine<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// EVAL an expression and decode handles in the result
    pub async fn eval_decoded(&mut self, expression: &str) -> EngineResult<Decoded> {
        let value = self.eval(expression).await?;
        decode(value, self.channel_id())
    }

    /// Call an engine function by name.
    ///
    /// Sends `name(a, b, ...)`, or just `name` without arguments, and always as
    /// EVAL regardless of any `=` in the rendered text.
    pub async fn call(&mut self, name: &str, args: &[Arg]) -> EngineResult<Decoded> {
        let expression = if args.is_empty() {
            name.to_string()
        } else {
            let rendered = args
                .iter()
                .map(|arg| self.render(arg))
                .collect::<EngineResult<Vec<_>>>()?;
            format!("{}({})", name, rendered.join(","))
        };
        self.eval_decoded(&expression).await
    }

    /// Proxy for the entity with a known id
    pub fn proxy(&self, kind: HandleKind, id: i32) -> Proxy {
        Proxy {
            kind,
            address: Address::Id(id),
            channel: self.channel_id(),
        }
    }

    /// Proxy for the entity an arbitrary expression evaluates to
    pub fn proxy_at(&self, kind: HandleKind, expression: impl Into<String>) -> Proxy {
        Proxy {
            kind,
            address: Address::Expr(expression.into()),
            channel: self.channel_id(),
        }
    }

    /// Iterate the engine's list of entities of one kind
    pub fn list(&mut self, kind: HandleKind) -> EntityList<'_, S> {
        EntityList::new(self, kind, ListSpec::for_kind(kind))
    }

    /// Iterate with custom head/next/cursor names
    pub fn list_with(&mut self, kind: HandleKind, spec: ListSpec) -> EntityList<'_, S> {
        EntityList::new(self, kind, spec)
    }

    pub fn balls(&mut self) -> EntityList<'_, S> {
        self.list(HandleKind::Ball)
    }

    pub(crate) fn check_proxy(&self, proxy: &Proxy) -> EngineResult<()> {
        if proxy.channel != self.channel_id() {
            return Err(EngineError::ForeignProxy {
                proxy: proxy.channel,
                channel: self.channel_id(),
            });
        }
        Ok(())
    }

    pub(crate) fn render(&self, arg: &Arg) -> EngineResult<String> {
        match arg {
            Arg::Value(value) => value
                .to_expression()
                .ok_or(EngineError::Unrenderable(value.tag())),
            Arg::Proxy(proxy) => {
                self.check_proxy(proxy)?;
                Ok(proxy.address())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Script;
    use crate::engine::Opcode;
    use crate::protocol::Tag;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_eval_decodes_handles() {
        let mut engine = Script::new()
            .expect(Opcode::Eval, "ball_head", Value::from(":ball: 7"))
            .expect(Opcode::Eval, "nothing", Value::from(":null:"))
            .expect(Opcode::Eval, "greeting", Value::from("hello"))
            .expect(Opcode::Eval, "1+1", Value::Int(2))
            .engine()
            .await;

        let head = engine.eval_decoded("ball_head").await.unwrap();
        assert_eq!(head, Decoded::Proxy(engine.proxy(HandleKind::Ball, 7)));

        assert!(engine.eval_decoded("nothing").await.unwrap().is_null());
        assert_eq!(
            engine.eval_decoded("greeting").await.unwrap(),
            Decoded::Value(Value::from("hello"))
        );
        assert_eq!(
            engine.eval_decoded("1+1").await.unwrap(),
            Decoded::Value(Value::Int(2))
        );
    }

    #[tokio::test]
    async fn test_malformed_handle() {
        let mut engine = Script::new()
            .expect(Opcode::Eval, "odd", Value::from(":wall: seven"))
            .engine()
            .await;
        let err = engine.eval_decoded("odd").await.unwrap_err();
        assert!(matches!(err, EngineError::BadHandle(ref s) if s == ":wall: seven"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_get_and_set() {
        let mut engine = Script::new()
            .expect(Opcode::Eval, "b_rad(find_ball(3))", Value::Float(0.5))
            .expect(Opcode::Assign, "b_rad(find_ball(3))=0.25", Value::Int(0))
            .expect(Opcode::Eval, "b_next(find_ball(3))", Value::from(":ball: 4"))
            .engine()
            .await;

        let ball = engine.proxy(HandleKind::Ball, 3);
        assert_eq!(
            ball.get(&mut engine, "rad").await.unwrap(),
            Decoded::Value(Value::Float(0.5))
        );
        assert_eq!(
            ball.set(&mut engine, "rad", 0.25).await.unwrap(),
            Arg::Value(Value::Float(0.25))
        );

        let next = ball.next(&mut engine).await.unwrap().unwrap();
        assert_eq!(next.id(), Some(4));
        assert_eq!(next.kind(), HandleKind::Ball);
    }

    #[tokio::test]
    async fn test_unknown_intrinsic_stays_local() {
        // no requests scripted: any write to the mock would fail the test
        let mut engine = Script::new().engine().await;
        let wall = engine.proxy(HandleKind::Wall, 1);

        let err = wall.get(&mut engine, "rad").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownIntrinsic { kind: HandleKind::Wall, .. }
        ));
        let err = wall.set(&mut engine, "bogus", 1).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownIntrinsic { .. }));
        assert!(engine.is_open());
    }

    #[tokio::test]
    async fn test_foreign_proxy_rejected() {
        let mut first = Script::new().engine().await;
        let second = Script::new().engine().await;

        let stranger = second.proxy(HandleKind::Ball, 1);
        let err = stranger.get(&mut first, "rad").await.unwrap_err();
        assert!(matches!(err, EngineError::ForeignProxy { .. }));
    }

    #[tokio::test]
    async fn test_call_always_evals() {
        let mut engine = Script::new()
            .expect(Opcode::Eval, "cycle_count", Value::Int(100))
            .expect(Opcode::Eval, "ball_near(1.0,'a')", Value::from(":ball: 2"))
            .expect(Opcode::Eval, "same(find_ball(2),3)", Value::Int(0))
            .engine()
            .await;

        assert_eq!(
            engine.call("cycle_count", &[]).await.unwrap(),
            Decoded::Value(Value::Int(100))
        );

        let near = engine
            .call("ball_near", &[Arg::from(1.0), Arg::from("a")])
            .await
            .unwrap()
            .into_proxy()
            .unwrap();
        engine
            .call("same", &[Arg::from(&near), Arg::from(3)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_blob_argument_is_rejected() {
        let mut engine = Script::new().engine().await;
        let err = engine
            .call("f", &[Arg::from(Value::Blob(Bytes::from_static(b"xx")))])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unrenderable(Tag::Blob)));
    }

    #[tokio::test]
    async fn test_unrenderable_arguments_stay_local() {
        // nothing scripted: a malformed expression must never reach the engine
        let mut engine = Script::new().engine().await;
        let ball = engine.proxy(HandleKind::Ball, 1);

        let err = ball.set(&mut engine, "rad", f64::NAN).await.unwrap_err();
        assert!(matches!(err, EngineError::Unrenderable(Tag::Float)));

        let err = engine.call("label", &[Arg::from("it's")]).await.unwrap_err();
        assert!(matches!(err, EngineError::Unrenderable(Tag::Text)));
        assert!(engine.is_open());
    }

    #[test]
    fn test_decode_leaves_numbers_alone() {
        let channel = ChannelId::for_tests();
        assert_eq!(
            decode(Value::Vec2([1.0, 2.0]), channel).unwrap(),
            Decoded::Value(Value::Vec2([1.0, 2.0]))
        );
        assert_eq!(
            decode(Value::from(":clump: 9"), channel)
                .unwrap()
                .into_proxy()
                .map(|p| p.address()),
            Some("find_clump(9)".to_string())
        );
    }

    #[tokio::test]
    async fn test_proxy_at_expression() {
        let mut engine = Script::new()
            .expect(Opcode::Eval, "m_poros(meas_head)", Value::Float(0.35))
            .engine()
            .await;
        let meas = engine.proxy_at(HandleKind::Measurement, "meas_head");
        assert_eq!(meas.id(), None);
        assert_eq!(
            meas.get(&mut engine, "poros").await.unwrap(),
            Decoded::Value(Value::Float(0.35))
        );
    }
}
