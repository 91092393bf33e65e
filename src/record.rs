//! Trace records
//!
//! One [`Record`] per log entry. Records are what sinks encode: the binary
//! encoding is MessagePack of this enum, the ascii encoding is the
//! comma-separated rendering produced by its `Display` impl:
//!
//! ```text
//! SCRIPT_ENTER,1,7,app.js
//! CREATE_OBJ,7:12,1
//! DECLARE,12,x,1
//! PUTFIELD,15,1,next,0
//! LAST_USE,1,7:15,4
//! ```
//!
//! Names that contain `,`, `\` or a line break are escaped with a backslash
//! so every record stays on one line.

use crate::value::{FreeVars, Iid, LogicalTime, ObjectId, ScriptId, SourceId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single trace log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    /// Binding `name` declared with value `id` (0 for primitives)
    Declare { site: Iid, name: String, id: ObjectId },
    /// Non-callable object allocated
    CreateObj { site: SourceId, id: ObjectId },
    /// Callable allocated together with its prototype object
    CreateFun {
        site: SourceId,
        id: ObjectId,
        prototype_id: ObjectId,
        enter_site: Iid,
    },
    /// Field `name` of `base_id` now points at `value_id` (0: primitive or deleted)
    PutField {
        site: Iid,
        base_id: ObjectId,
        name: String,
        value_id: ObjectId,
    },
    /// Variable `name` now points at `id` (0: overwritten by a primitive)
    Write { site: Iid, name: String, id: ObjectId },
    /// Last observed use of `id`
    LastUse {
        id: ObjectId,
        site: SourceId,
        time: LogicalTime,
    },
    FunctionEnter { site: Iid, fun_id: ObjectId },
    FunctionExit { site: Iid },
    /// Call of an instrumented function, logged at the call site
    Call {
        site: Iid,
        callee_id: Option<ObjectId>,
        enter_site: Iid,
        stable_id: u32,
    },
    Return { id: ObjectId },
    /// Creation site of `id` rebound to `site`
    UpdateIid { id: ObjectId, site: Iid },
    Debug { site: Iid, id: ObjectId },
    ScriptEnter {
        site: Iid,
        script_id: ScriptId,
        file_name: String,
    },
    ScriptExit { site: Iid },
    SourceMapping {
        site: Iid,
        start_line: u32,
        start_column: u32,
        end_line: u32,
        end_column: u32,
    },
    FreeVars { site: Iid, names: FreeVars },
    /// Segment boundary; `site` is the recorded flush point
    TopLevelFlush { site: SourceId },
}

impl Record {
    /// Ascii tag of the record kind
    pub fn tag(&self) -> &'static str {
        match self {
            Record::Declare { .. } => "DECLARE",
            Record::CreateObj { .. } => "CREATE_OBJ",
            Record::CreateFun { .. } => "CREATE_FUN",
            Record::PutField { .. } => "PUTFIELD",
            Record::Write { .. } => "WRITE",
            Record::LastUse { .. } => "LAST_USE",
            Record::FunctionEnter { .. } => "FUNCTION_ENTER",
            Record::FunctionExit { .. } => "FUNCTION_EXIT",
            Record::Call { .. } => "CALL",
            Record::Return { .. } => "RETURN",
            Record::UpdateIid { .. } => "UPDATE_IID",
            Record::Debug { .. } => "DEBUG",
            Record::ScriptEnter { .. } => "SCRIPT_ENTER",
            Record::ScriptExit { .. } => "SCRIPT_EXIT",
            Record::SourceMapping { .. } => "SOURCE_MAPPING",
            Record::FreeVars { .. } => "FREE_VARS",
            Record::TopLevelFlush { .. } => "TOP_LEVEL_FLUSH",
        }
    }
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            ',' => out.push_str("\\,"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            Record::Declare { site, name, id } | Record::Write { site, name, id } => {
                write!(f, "{},{},{},{}", tag, site, escape(name), id)
            }
            Record::CreateObj { site, id } => write!(f, "{},{},{}", tag, site, id),
            Record::CreateFun {
                site,
                id,
                prototype_id,
                enter_site,
            } => write!(f, "{},{},{},{},{}", tag, site, id, prototype_id, enter_site),
            Record::PutField {
                site,
                base_id,
                name,
                value_id,
            } => write!(f, "{},{},{},{},{}", tag, site, base_id, escape(name), value_id),
            Record::LastUse { id, site, time } => write!(f, "{},{},{},{}", tag, id, site, time),
            Record::FunctionEnter { site, fun_id } => write!(f, "{},{},{}", tag, site, fun_id),
            Record::FunctionExit { site } | Record::ScriptExit { site } => {
                write!(f, "{},{}", tag, site)
            }
            Record::Call {
                site,
                callee_id,
                enter_site,
                stable_id,
            } => {
                let callee = callee_id.map_or_else(|| "-1".to_string(), |id| id.to_string());
                write!(f, "{},{},{},{},{}", tag, site, callee, enter_site, stable_id)
            }
            Record::Return { id } => write!(f, "{},{}", tag, id),
            Record::UpdateIid { id, site } => write!(f, "{},{},{}", tag, id, site),
            Record::Debug { site, id } => write!(f, "{},{},{}", tag, site, id),
            Record::ScriptEnter {
                site,
                script_id,
                file_name,
            } => write!(f, "{},{},{},{}", tag, site, script_id, escape(file_name)),
            Record::SourceMapping {
                site,
                start_line,
                start_column,
                end_line,
                end_column,
            } => write!(
                f,
                "{},{},{},{},{},{}",
                tag, site, start_line, start_column, end_line, end_column
            ),
            Record::FreeVars { site, names } => {
                write!(f, "{},{},{}", tag, site, escape(&names.to_string()))
            }
            Record::TopLevelFlush { site } => write!(f, "{},{}", tag, site),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_rendering() {
        let rec = Record::PutField {
            site: 15,
            base_id: ObjectId(1),
            name: "next".into(),
            value_id: ObjectId::PRIMITIVE,
        };
        assert_eq!(rec.to_string(), "PUTFIELD,15,1,next,0");

        let rec = Record::LastUse {
            id: ObjectId(1),
            site: SourceId::new(7, 15),
            time: 4,
        };
        assert_eq!(rec.to_string(), "LAST_USE,1,7:15,4");
    }

    #[test]
    fn test_call_without_callee_id() {
        let rec = Record::Call {
            site: 3,
            callee_id: None,
            enter_site: 9,
            stable_id: 1,
        };
        assert_eq!(rec.to_string(), "CALL,3,-1,9,1");
    }

    #[test]
    fn test_names_are_escaped() {
        let rec = Record::Write {
            site: 1,
            name: "a,b\\c\n".into(),
            id: ObjectId(2),
        };
        assert_eq!(rec.to_string(), "WRITE,1,a\\,b\\\\c\\n,2");
        assert_eq!(rec.to_string().lines().count(), 1);
    }

    #[test]
    fn test_free_vars_rendering() {
        let rec = Record::FreeVars {
            site: 4,
            names: FreeVars::Names(vec!["x".into(), "y".into()]),
        };
        assert_eq!(rec.to_string(), "FREE_VARS,4,[x|y]");
        let rec = Record::FreeVars {
            site: 4,
            names: FreeVars::Names(vec!["ANY".into(), "a|b".into()]),
        };
        // the name escape is escaped again at the record level
        assert_eq!(rec.to_string(), r"FREE_VARS,4,[ANY|a\\|b]");
        let rec = Record::FreeVars {
            site: 4,
            names: FreeVars::Any,
        };
        assert_eq!(rec.to_string(), "FREE_VARS,4,ANY");
    }
}
