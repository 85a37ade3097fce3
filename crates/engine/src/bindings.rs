//! The per-run binding map and `{{ path }}` template rendering.
//!
//! Bindings hold the trigger payload (under `trigger`), every bound action
//! output so far, and, inside a loop body, the current `item` and `index`.
//! A path whose first segment is not a binding is looked up in the trigger
//! payload, so gates can name event fields directly. Names the workflow
//! declares as output bindings never fall back: until their producer runs
//! they are undefined, even when the payload has a field of the same name.
//! `trigger.<field>` always reads the payload.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::condition::{lookup_path, FieldResolver};
use crate::error::UnresolvedReference;

pub const TRIGGER_BINDING: &str = "trigger";
pub const ITEM_BINDING: &str = "item";
pub const INDEX_BINDING: &str = "index";

pub const RESERVED_BINDINGS: [&str; 3] = [TRIGGER_BINDING, ITEM_BINDING, INDEX_BINDING];

#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: Map<String, Value>,
    /// Every output binding the workflow declares, bound yet or not.
    declared: Arc<HashSet<String>>,
}

impl Bindings {
    pub fn new(trigger_payload: Value) -> Self {
        let mut values = Map::new();
        values.insert(TRIGGER_BINDING.to_owned(), trigger_payload);
        Self {
            values,
            declared: Arc::default(),
        }
    }

    /// Mark `names` as output bindings so an unset one resolves to nothing.
    pub fn with_declared<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared = Arc::new(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A child scope for one loop iteration.
    pub fn for_iteration(&self, index: usize, item: Value) -> Self {
        let mut scope = self.clone();
        scope.bind(ITEM_BINDING, item);
        scope.bind(INDEX_BINDING, Value::from(index));
        scope
    }

    /// Render every `{{ path }}` in `params`.
    pub fn render(&self, params: &Map<String, Value>) -> Result<Value, UnresolvedReference> {
        let mut out = Map::with_capacity(params.len());
        for (key, value) in params {
            out.insert(key.clone(), self.render_value(value)?);
        }
        Ok(Value::Object(out))
    }

    pub fn render_value(&self, value: &Value) -> Result<Value, UnresolvedReference> {
        match value {
            Value::String(s) => self.render_str(s),
            Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => self.render(map),
            other => Ok(other.clone()),
        }
    }

    fn render_str(&self, s: &str) -> Result<Value, UnresolvedReference> {
        let refs = template_refs(s);
        if refs.is_empty() {
            return Ok(Value::String(s.to_owned()));
        }

        // A string that is exactly one reference keeps the referenced type.
        if let [only] = refs.as_slice() {
            if only.start == 0 && only.end == s.len() {
                return self
                    .resolve(only.path)
                    .map(Cow::into_owned)
                    .ok_or_else(|| UnresolvedReference(only.path.to_owned()));
            }
        }

        let mut rendered = String::with_capacity(s.len());
        let mut cursor = 0;
        for r in &refs {
            rendered.push_str(&s[cursor..r.start]);
            let value = self
                .resolve(r.path)
                .ok_or_else(|| UnresolvedReference(r.path.to_owned()))?;
            match value.as_ref() {
                Value::String(text) => rendered.push_str(text),
                other => rendered.push_str(&other.to_string()),
            }
            cursor = r.end;
        }
        rendered.push_str(&s[cursor..]);
        Ok(Value::String(rendered))
    }
}

impl FieldResolver for Bindings {
    fn resolve(&self, path: &str) -> Option<Cow<'_, Value>> {
        let path = path.trim();
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head.trim(), Some(rest)),
            None => (path, None),
        };

        match self.values.get(head) {
            Some(base) => match rest {
                Some(rest) => lookup_path(base, rest),
                None => Some(Cow::Borrowed(base)),
            },
            None if self.declared.contains(head) => None,
            None => self
                .values
                .get(TRIGGER_BINDING)
                .and_then(|payload| lookup_path(payload, path)),
        }
    }
}

/// One `{{ path }}` occurrence; `start..end` spans the braces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateRef<'a> {
    pub start: usize,
    pub end: usize,
    pub path: &'a str,
}

impl<'a> TemplateRef<'a> {
    /// The binding name the path starts with.
    pub fn root(&self) -> &'a str {
        root_segment(self.path)
    }
}

pub fn root_segment(path: &str) -> &str {
    path.split('.').next().unwrap_or(path).trim()
}

/// Every `{{ path }}` in `s`, in order. An unterminated `{{` is left as text.
pub fn template_refs(s: &str) -> Vec<TemplateRef<'_>> {
    let mut refs = Vec::new();
    let mut offset = 0;

    while let Some(open) = s[offset..].find("{{") {
        let start = offset + open;
        let Some(close) = s[start + 2..].find("}}") else {
            break;
        };
        let end = start + 2 + close + 2;
        let path = s[start + 2..end - 2].trim();
        if !path.is_empty() {
            refs.push(TemplateRef { start, end, path });
        }
        offset = end;
    }

    refs
}

/// Template references anywhere inside `value`.
pub fn collect_refs<'a>(value: &'a Value, out: &mut Vec<TemplateRef<'a>>) {
    match value {
        Value::String(s) => out.extend(template_refs(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_refs(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_refs(v, out)),
        _ => {}
    }
}
