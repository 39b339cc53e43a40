// src/modifier/path.rs

//! Typed path-set over a `serde_json::Value` tree.
//!
//! A path is a sequence of segments separated by `.` or `/`
//! (`arguments.target`, `arguments/hosts/0`). A segment addresses a key
//! when the current node is an object and an index when it is an array.
//! Missing object keys (and nulls) become objects along the way; arrays are
//! never grown.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("segment '{segment}' of '{path}' is not a valid array index")]
    BadIndex { path: String, segment: String },

    #[error("index {index} of '{path}' is out of bounds (len {len})")]
    OutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("'{path}' walks through a scalar at segment '{segment}'")]
    NotAContainer { path: String, segment: String },

    #[error("'{0}' must be written with a string")]
    NotAString(String),

    #[error("'{path}' starts at '{root}'; a job can only be patched under 'command' or 'arguments'")]
    UnknownRoot { path: String, root: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath {
    raw: String,
    segments: Vec<String>,
}

impl ValuePath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Write `value` at this path inside `root`.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), PathError> {
        let (last, parents) = self
            .segments
            .split_last()
            .ok_or(PathError::Empty)?;

        let mut node = root;
        for segment in parents {
            node = self.child_mut(node, segment)?;
        }

        if node.is_null() {
            *node = Value::Object(Map::new());
        }

        match node {
            Value::Object(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::Array(items) => {
                let index = self.index(last)?;
                let len = items.len();
                let slot = items.get_mut(index).ok_or_else(|| PathError::OutOfBounds {
                    path: self.raw.clone(),
                    index,
                    len,
                })?;
                *slot = value;
                Ok(())
            }
            _ => Err(PathError::NotAContainer {
                path: self.raw.clone(),
                segment: last.clone(),
            }),
        }
    }

    /// Read the value at this path, if present.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    fn child_mut<'a>(&self, node: &'a mut Value, segment: &str) -> Result<&'a mut Value, PathError> {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }

        match node {
            Value::Object(map) => Ok(map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()))),
            Value::Array(items) => {
                let index = self.index(segment)?;
                let len = items.len();
                items.get_mut(index).ok_or_else(|| PathError::OutOfBounds {
                    path: self.raw.clone(),
                    index,
                    len,
                })
            }
            _ => Err(PathError::NotAContainer {
                path: self.raw.clone(),
                segment: segment.to_string(),
            }),
        }
    }

    fn index(&self, segment: &str) -> Result<usize, PathError> {
        segment.parse().map_err(|_| PathError::BadIndex {
            path: self.raw.clone(),
            segment: segment.to_string(),
        })
    }
}

impl FromStr for ValuePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s
            .split(['.', '/'])
            .map(str::trim)
            .filter(|seg| !seg.is_empty())
            .map(str::to_string)
            .collect();

        if segments.is_empty() {
            return Err(PathError::Empty);
        }

        Ok(Self {
            raw: s.to_string(),
            segments,
        })
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Top-level fields of a job a modifier may write into.
pub const JOB_ROOTS: [&str; 2] = ["command", "arguments"];

impl ValuePath {
    /// Reject paths that do not start at a patchable job field.
    pub fn ensure_job_root(&self) -> Result<(), PathError> {
        match self.segments.first() {
            Some(root) if JOB_ROOTS.contains(&root.as_str()) => Ok(()),
            Some(root) => Err(PathError::UnknownRoot {
                path: self.raw.clone(),
                root: root.clone(),
            }),
            None => Err(PathError::Empty),
        }
    }
}

/// Patch a job made of its `command` and `arguments`.
///
/// Paths are rooted at the job: `arguments.<...>` writes into the argument
/// tree, `command` replaces the command string.
pub fn patch_job(
    command: &mut String,
    arguments: &mut Value,
    path: &ValuePath,
    value: Value,
) -> Result<(), PathError> {
    path.ensure_job_root()?;

    match path.segments.split_first() {
        Some((root, [])) if root == "command" => match value {
            Value::String(s) => {
                *command = s;
                Ok(())
            }
            _ => Err(PathError::NotAString("command".to_string())),
        },
        Some((root, [next, ..])) if root == "command" => Err(PathError::NotAContainer {
            path: path.raw.clone(),
            segment: next.clone(),
        }),
        Some((_, [])) => {
            *arguments = value;
            Ok(())
        }
        Some((_, rest)) => {
            let inner = ValuePath {
                raw: path.raw.clone(),
                segments: rest.to_vec(),
            };
            inner.set(arguments, value)
        }
        None => Err(PathError::Empty),
    }
}
