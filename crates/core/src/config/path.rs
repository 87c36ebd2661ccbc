//! Derived services reading one field out of a JSON document service

use serde_json::Value;

use crate::container::{Invocation, Producer, ServiceKey};

/// Split `a.b[0].c` into `["a", "b", "0", "c"]`
fn segments(path: &str) -> Vec<&str> {
    path.split(|c| c == '.' || c == '[' || c == ']')
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Follow a dotted path with optional `[index]` parts through `value`
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    segments(path)
        .into_iter()
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Producer reading `path` out of the JSON document registered under `source`
///
/// A missing field or an explicit `null` produces nothing, so the derived
/// service should stay optional unless the field is mandatory.
pub fn path_of(source: &ServiceKey, path: &str) -> Producer {
    let source = source.clone();
    let path = path.to_string();
    Producer::optional_factory(move |invocation: &Invocation<'_>| {
        let document = invocation.registry()?.resolve::<Value>(&source)?;
        Ok(lookup_path(&document, &path)
            .filter(|value| !value.is_null())
            .cloned())
    })
}
