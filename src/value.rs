//! Core vocabulary shared by the identity manager, the last-use tracker and
//! the dispatcher.
//!
//! The tracer never looks inside host objects. Everything it knows about a
//! heap object arrives as an opaque reference `R` (see [`crate::host::Host`])
//! wrapped in a [`Value`], plus whatever the host answers through
//! [`PropertyDescriptor`] queries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction-site identifier supplied by the instrumentation framework.
pub type Iid = u32;

/// Identifier of an instrumented script.
pub type ScriptId = u32;

/// Logical time as reported by the sink's clock.
pub type LogicalTime = u64;

/// Stable integer identity assigned to a host object.
///
/// Ids are allocated from 1 upward; [`ObjectId::PRIMITIVE`] (0) is the
/// marker written into records whose value is not a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// Marker for "no object" (primitive value or removed property)
    pub const PRIMITIVE: ObjectId = ObjectId(0);

    /// Whether this is the primitive marker
    pub fn is_primitive(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A site qualified by the script it belongs to.
///
/// This is the representation the sink sees for creation sites and last-use
/// sites; bare [`Iid`]s are only unique within one script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceId {
    pub sid: ScriptId,
    pub iid: Iid,
}

impl SourceId {
    pub fn new(sid: ScriptId, iid: Iid) -> Self {
        Self { sid, iid }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sid, self.iid)
    }
}

/// A runtime value as seen by a hook.
///
/// Only [`Value::Object`] carries identity; everything else is a primitive
/// and is never assigned an id.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<R> {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(R),
}

impl<R> Value<R> {
    /// Whether this value is a heap object
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// The object reference, if this value is a heap object
    pub fn as_object(&self) -> Option<&R> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    /// Convert a primitive operand into a property name.
    ///
    /// Returns `None` for `undefined`, `null` and objects; the host stringifies
    /// object keys before they reach a hook.
    pub fn property_key(&self) -> Option<String> {
        match self {
            Value::Undefined | Value::Null | Value::Object(_) => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            Value::Str(s) => Some(s.clone()),
        }
    }
}

/// Render numbers the way property keys spell them (`1` rather than `1.0`).
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Answer to a `describeProperty(obj, name)` capability query.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDescriptor<R> {
    /// Plain data property holding `value`
    Plain { value: Value<R> },
    /// Accessor property; either function may be absent
    Accessor { getter: Option<R>, setter: Option<R> },
}

impl<R> PropertyDescriptor<R> {
    pub fn is_accessor(&self) -> bool {
        matches!(self, PropertyDescriptor::Accessor { .. })
    }
}

/// Free variables referenced by a function, as precomputed by the
/// instrumentation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreeVars {
    /// The function may reference any name (e.g. it calls `eval`)
    Any,
    /// Exactly these names
    Names(Vec<String>),
}

/// `ANY`, or a bracketed `|`-separated list with `\\`, `|` and `]` escaped
/// inside names, so `[ANY]` and `ANY` stay distinct
impl fmt::Display for FreeVars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeVars::Any => write!(f, "ANY"),
            FreeVars::Names(names) => {
                f.write_str("[")?;
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        f.write_str("|")?;
                    }
                    for c in name.chars() {
                        if matches!(c, '\\' | '|' | ']') {
                            f.write_str("\\")?;
                        }
                        write!(f, "{}", c)?;
                    }
                }
                f.write_str("]")
            }
        }
    }
}
