//! Resolved field paths.
//!
//! Routes address item fields with dotted paths (`address.city`). Each path is
//! resolved once into a segment list when the route set is loaded, so row
//! construction never re-parses path strings.

use serde_json::{Map, Value};

use super::types::Item;

/// A dotted path resolved into its segment list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    segments: Vec<String>,
}

impl ResolvedPath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Look the path up in an item, returning the value at the leaf.
    ///
    /// Missing intermediate objects or leaves yield `None`. A numeric segment
    /// indexes into an array.
    pub fn lookup(&self, item: &Item) -> Option<Value> {
        if self.segments.len() == 1 && self.segments[0] == "id" {
            return Some(Value::String(item.id.clone()));
        }

        let mut current = item.rest.get(self.segments.first()?)?;
        for segment in &self.segments[1..] {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(values) => values.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current.clone())
    }

    /// Write a value at the path, creating intermediate objects as needed.
    ///
    /// Returns `false` when the path cannot be written: an empty path, an
    /// intermediate non-object value, or an out-of-range array index.
    pub fn set(&self, item: &mut Item, value: Value) -> bool {
        let Some((leaf, parents)) = self.segments.split_last() else {
            return false;
        };

        if parents.is_empty() && leaf == "id" {
            return match value {
                Value::String(id) => {
                    item.id = id;
                    true
                }
                _ => false,
            };
        }

        let mut current = &mut item.rest;
        for segment in parents {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                _ => return false,
            };
        }

        current.insert(leaf.clone(), value);
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(value: serde_json::Value) -> Item {
        serde_json::from_value(value).expect("valid item")
    }

    #[test]
    fn looks_up_nested_values() {
        let item = item(json!({"id": "1", "address": {"city": "Trieste", "zip": 34100}}));

        let path = ResolvedPath::parse("address.city");
        assert_eq!(path.lookup(&item), Some(json!("Trieste")));

        let path = ResolvedPath::parse("address.zip");
        assert_eq!(path.lookup(&item), Some(json!(34100)));
    }

    #[test]
    fn id_path_resolves_to_the_identifier() {
        let item = item(json!({"id": "42", "age": 5}));
        assert_eq!(
            ResolvedPath::parse("id").lookup(&item),
            Some(json!("42"))
        );
    }

    #[test]
    fn missing_values_are_none() {
        let item = item(json!({"id": "1", "age": 5}));

        assert_eq!(ResolvedPath::parse("name").lookup(&item), None);
        assert_eq!(ResolvedPath::parse("age.unit").lookup(&item), None);
    }

    #[test]
    fn indexes_into_arrays() {
        let item = item(json!({"id": "1", "tags": ["a", "b"]}));

        assert_eq!(ResolvedPath::parse("tags.1").lookup(&item), Some(json!("b")));
        assert_eq!(ResolvedPath::parse("tags.2").lookup(&item), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut item = item(json!({"id": "1"}));

        assert!(ResolvedPath::parse("address.city").set(&mut item, json!("Udine")));
        assert_eq!(
            ResolvedPath::parse("address.city").lookup(&item),
            Some(json!("Udine"))
        );
    }

    #[test]
    fn set_refuses_to_traverse_scalars() {
        let mut item = item(json!({"id": "1", "age": 5}));

        assert!(!ResolvedPath::parse("age.unit").set(&mut item, json!("years")));
        assert!(!ResolvedPath::parse("").set(&mut item, json!(1)));
    }

    #[test]
    fn set_id_requires_a_string() {
        let mut item = item(json!({"id": "1"}));

        assert!(!ResolvedPath::parse("id").set(&mut item, json!(2)));
        assert!(ResolvedPath::parse("id").set(&mut item, json!("2")));
        assert_eq!(item.id, "2");
    }
}
