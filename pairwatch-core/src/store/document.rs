//! Document-level primitives shared by every store backend: filters,
//! projections and mutations over JSON documents.

use super::StoreError;
use crate::domain::DocumentId;
use serde_json::{Map, Value};

/// Selects documents within one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document.
    All,
    /// Exactly one physical document.
    Id(DocumentId),
    /// JSON containment: the document must contain `pattern`.
    ///
    /// Objects match key by key, arrays match when every pattern element is
    /// contained by some document element, scalars match by equality. So
    /// `{"data": ["usd"]}` selects documents whose `data` array holds "usd",
    /// and `{"data": [{"id": "bitcoin"}]}` selects those holding an object
    /// with that id.
    Matches(Value),
}

impl Filter {
    pub fn matches(&self, id: DocumentId, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Id(wanted) => *wanted == id,
            Filter::Matches(pattern) => contains(doc, pattern),
        }
    }
}

/// JSON containment, as in PostgreSQL's `jsonb @> jsonb`.
pub fn contains(doc: &Value, pattern: &Value) -> bool {
    match (doc, pattern) {
        (Value::Object(d), Value::Object(p)) => p
            .iter()
            .all(|(key, pv)| d.get(key).is_some_and(|dv| contains(dv, pv))),
        (Value::Array(d), Value::Array(p)) => {
            p.iter().all(|pv| d.iter().any(|dv| contains(dv, pv)))
        }
        (Value::Array(d), scalar) if !scalar.is_object() => d.iter().any(|dv| dv == scalar),
        (d, p) => d == p,
    }
}

/// Shapes a document on its way out of the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    slices: Vec<(String, usize)>,
    excludes: Vec<String>,
}

impl Projection {
    /// The whole document.
    pub fn full() -> Self {
        Self::default()
    }

    /// Keep only the last `count` elements of the array at `path`.
    ///
    /// Negative-offset semantics: if fewer elements exist, all are kept.
    pub fn last(mut self, path: impl Into<String>, count: usize) -> Self {
        self.slices.push((path.into(), count));
        self
    }

    /// Drop the field at `path`.
    pub fn exclude(mut self, path: impl Into<String>) -> Self {
        self.excludes.push(path.into());
        self
    }

    pub fn is_full(&self) -> bool {
        self.slices.is_empty() && self.excludes.is_empty()
    }

    pub fn apply(&self, doc: &mut Value) {
        for path in &self.excludes {
            remove_path(doc, path);
        }
        for (path, count) in &self.slices {
            if let Some(Value::Array(items)) = get_path_mut(doc, path) {
                let len = items.len();
                if len > *count {
                    items.drain(..len - count);
                }
            }
        }
    }
}

/// A change applied to one document.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// Set the field at `path`, creating intermediate objects.
    Set { path: String, value: Value },
    /// Append to the array at `path`, creating it if missing.
    Push { path: String, value: Value },
    /// Remove every element equal to `value` from the array at `path`.
    Pull { path: String, value: Value },
    /// Replace the whole document.
    Replace(Value),
}

impl Mutation {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Mutation::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn push(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Mutation::Push {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn pull(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Mutation::Pull {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn apply(&self, doc: &mut Value) -> Result<(), StoreError> {
        match self {
            Mutation::Set { path, value } => {
                *get_or_create_path(doc, path)? = value.clone();
            }
            Mutation::Push { path, value } => {
                let slot = get_or_create_path(doc, path)?;
                if slot.is_null() {
                    *slot = Value::Array(Vec::new());
                }
                match slot {
                    Value::Array(items) => items.push(value.clone()),
                    _ => return Err(not_an_array(path)),
                }
            }
            Mutation::Pull { path, value } => match get_path_mut(doc, path) {
                Some(Value::Array(items)) => items.retain(|item| item != value),
                Some(Value::Null) | None => {}
                Some(_) => return Err(not_an_array(path)),
            },
            Mutation::Replace(body) => {
                if !body.is_object() {
                    return Err(StoreError::NotAnObject);
                }
                *doc = body.clone();
            }
        }
        Ok(())
    }
}

fn not_an_array(path: &str) -> StoreError {
    StoreError::InvalidMutation {
        path: path.to_string(),
        reason: "target is not an array".into(),
    }
}

fn get_path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.')
        .try_fold(doc, |node, segment| node.as_object_mut()?.get_mut(segment))
}

fn get_or_create_path<'a>(doc: &'a mut Value, path: &str) -> Result<&'a mut Value, StoreError> {
    let mut node = doc;
    for segment in path.split('.') {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .ok_or_else(|| StoreError::InvalidMutation {
                path: path.to_string(),
                reason: format!("'{segment}' is nested under a non-object"),
            })?
            .entry(segment)
            .or_insert(Value::Null);
    }
    Ok(node)
}

fn remove_path(doc: &mut Value, path: &str) {
    let (parent, leaf) = match path.rsplit_once('.') {
        Some((parent, leaf)) => (get_path_mut(doc, parent), leaf),
        None => (Some(doc), path),
    };
    if let Some(Value::Object(map)) = parent {
        map.remove(leaf);
    }
}
