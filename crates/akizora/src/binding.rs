//! Field and index lookup on render data.

use std::collections::BTreeMap;

use akizora_ast::Accessor;

use crate::value::Value;

/// Anything a field path can step into.
pub trait Lookup {
    fn lookup(&self, accessor: &Accessor) -> Option<&Value>;
}

impl Lookup for [Value] {
    fn lookup(&self, accessor: &Accessor) -> Option<&Value> {
        match accessor {
            Accessor::Index(index) => self.get(*index),
            Accessor::Field(_) => None,
        }
    }
}

impl Lookup for BTreeMap<String, Value> {
    fn lookup(&self, accessor: &Accessor) -> Option<&Value> {
        match accessor {
            Accessor::Field(name) => self.get(name),
            // `.0` on a map reads the key "0"
            Accessor::Index(index) => self.get(&index.to_string()),
        }
    }
}

impl Lookup for Value {
    fn lookup(&self, accessor: &Accessor) -> Option<&Value> {
        match self {
            Value::Array(items) => items.as_slice().lookup(accessor),
            Value::Object(map) => map.lookup(accessor),
            _ => None,
        }
    }
}

/// Why one step of a path found nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// Object without the requested key
    MissingKey,
    /// Array index past the end
    OutOfRange { len: usize },
    /// Stepping into null
    Nil,
    /// Stepping into a scalar, or a named field on an array
    NotIndexable { type_name: &'static str },
}

/// Take one step, classifying a failed lookup.
pub fn step<'v>(value: &'v Value, accessor: &Accessor) -> Result<&'v Value, Miss> {
    if let Some(found) = value.lookup(accessor) {
        return Ok(found);
    }
    Err(match (value, accessor) {
        (Value::Null, _) => Miss::Nil,
        (Value::Object(_), _) => Miss::MissingKey,
        (Value::Array(items), Accessor::Index(_)) => Miss::OutOfRange { len: items.len() },
        (other, _) => Miss::NotIndexable {
            type_name: other.type_name(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str) -> Accessor {
        Accessor::Field(name.to_string())
    }

    #[test]
    fn test_lookup_object_and_array() {
        let data = Value::from_json(json!({"Items": ["a", "b"], "3": "three"}));
        let items = data.lookup(&field("Items")).unwrap();
        assert_eq!(items.lookup(&Accessor::Index(1)), Some(&Value::from("b")));
        assert_eq!(data.lookup(&Accessor::Index(3)), Some(&Value::from("three")));
        assert_eq!(items.lookup(&field("len")), None);
    }

    #[test]
    fn test_step_classifies_misses() {
        let data = Value::from_json(json!({"Items": ["a"], "Name": "x", "Nothing": null}));
        assert_eq!(step(&data, &field("Missing")), Err(Miss::MissingKey));

        let items = step(&data, &field("Items")).unwrap();
        assert_eq!(
            step(items, &Accessor::Index(4)),
            Err(Miss::OutOfRange { len: 1 })
        );
        assert_eq!(
            step(items, &field("First")),
            Err(Miss::NotIndexable { type_name: "array" })
        );

        let name = step(&data, &field("Name")).unwrap();
        assert_eq!(
            step(name, &field("Length")),
            Err(Miss::NotIndexable { type_name: "string" })
        );

        let nothing = step(&data, &field("Nothing")).unwrap();
        assert_eq!(step(nothing, &field("Deeper")), Err(Miss::Nil));
    }
}
