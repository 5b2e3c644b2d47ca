//! Remote handles
//!
//! The engine names its entities with Text values such as `:ball: 7`: a
//! sentinel for the kind, a space, and a decimal id. `:null:` means no entity.

use std::fmt;

/// Text that stands for "no entity"
pub const NULL_SENTINEL: &str = ":null:";

/// Kinds of remote entities a handle can name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Ball,
    Wall,
    Contact,
    Clump,
    Measurement,
}

impl HandleKind {
    pub const ALL: [HandleKind; 5] = [
        HandleKind::Ball,
        HandleKind::Wall,
        HandleKind::Contact,
        HandleKind::Clump,
        HandleKind::Measurement,
    ];

    /// Prefix marking a handle of this kind
    pub fn sentinel(self) -> &'static str {
        match self {
            HandleKind::Ball => ":ball:",
            HandleKind::Wall => ":wall:",
            HandleKind::Contact => ":contact:",
            HandleKind::Clump => ":clump:",
            HandleKind::Measurement => ":meas:",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HandleKind::Ball => "ball",
            HandleKind::Wall => "wall",
            HandleKind::Contact => "contact",
            HandleKind::Clump => "clump",
            HandleKind::Measurement => "measurement",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A (kind, id) reference to a remote entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteHandle {
    pub kind: HandleKind,
    pub id: i32,
}

impl RemoteHandle {
    pub fn new(kind: HandleKind, id: i32) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.sentinel(), self.id)
    }
}

/// Outcome of inspecting a Text value for a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedHandle {
    Entity(RemoteHandle),
    Null,
}

/// Inspect a Text value.
///
/// Returns `Ok(None)` for ordinary text, `Err` with the text when it starts with
/// a sentinel but the id is not a decimal integer.
pub fn parse_handle(text: &str) -> Result<Option<ParsedHandle>, String> {
    if let Some(rest) = text.strip_prefix(NULL_SENTINEL) {
        return if rest.trim().is_empty() {
            Ok(Some(ParsedHandle::Null))
        } else {
            Err(text.to_string())
        };
    }

    for kind in HandleKind::ALL {
        if let Some(rest) = text.strip_prefix(kind.sentinel()) {
            return rest
                .trim()
                .parse::<i32>()
                .map(|id| Some(ParsedHandle::Entity(RemoteHandle::new(kind, id))))
                .map_err(|_| text.to_string());
        }
    }

    Ok(None)
}
