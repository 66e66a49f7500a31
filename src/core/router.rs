//! # URN call routing.
//!
//! A URN names one function on one worker: `category:name:function`, exactly
//! three non-empty fields. Arguments are turned into positional parameters:
//!
//! | `args` serializes to | params sent        |
//! |----------------------|--------------------|
//! | array (tuple, Vec)   | its elements       |
//! | `null` (`()`)        | `[]`               |
//! | anything else        | `[value]`          |

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::{RpcError, SupervisorError};

/// Parsed `category:name:function` address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Urn {
    pub category: String,
    pub name: String,
    pub function: String,
}

impl FromStr for Urn {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(c), Some(n), Some(f), None) if !c.is_empty() && !n.is_empty() && !f.is_empty() => Ok(Urn {
                category: c.to_string(),
                name: n.to_string(),
                function: f.to_string(),
            }),
            _ => Err(SupervisorError::InvalidUrn { urn: s.to_string() }),
        }
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.category, self.name, self.function)
    }
}

/// Encodes call arguments as positional parameters.
pub(crate) fn to_params<A: Serialize>(args: &A) -> Result<Vec<Value>, RpcError> {
    Ok(match serde_json::to_value(args)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    })
}
