//! Record flattening and key canonicalisation.
//!
//! Destinations receive flat key→scalar maps with normalised identifiers.
//! [`reformat`] lowercases keys and replaces everything outside `[a-z0-9]`
//! with `_`; [`JsonFlattener`] walks a nested record and emits composite
//! keys joined with `_`, e.g. `{"key1":{"key2":123}}` becomes
//! `{"key1_key2":123}`, `{"(key1)":1}` becomes `{"_key1_":1}`.

use serde_json::Value;

use crate::event::Record;

/// Composite keys containing this marker carry destination type hints and
/// their values must reach the adapter untouched.
pub const SQL_TYPE_KEYWORD: &str = "__sql_type";

#[derive(Debug, thiserror::Error)]
pub enum FlattenError {
    #[error("can't flatten array with key {key}: {source}")]
    Slice {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Strategy for turning an array value into something a SQL destination can
/// store. The default serialises the array to a JSON string.
pub trait SliceStrategy: Send + Sync {
    fn flatten_slice(&self, values: &[Value]) -> anyhow::Result<Value>;
}

/// Serialises arrays to their JSON string representation.
pub struct SliceToJsonString;

impl SliceStrategy for SliceToJsonString {
    fn flatten_slice(&self, values: &[Value]) -> anyhow::Result<Value> {
        Ok(Value::String(serde_json::to_string(values)?))
    }
}

pub trait Flattener: Send + Sync {
    fn flatten_object(&self, record: &Record) -> Result<Record, FlattenError>;
}

/// Flattens nested JSON records into flat maps with reformatted keys.
pub struct JsonFlattener {
    omit_nil_values: bool,
    slice_strategy: Box<dyn SliceStrategy>,
}

impl Default for JsonFlattener {
    fn default() -> JsonFlattener {
        JsonFlattener {
            omit_nil_values: true,
            slice_strategy: Box::new(SliceToJsonString),
        }
    }
}

impl JsonFlattener {
    pub fn new(slice_strategy: Box<dyn SliceStrategy>) -> JsonFlattener {
        JsonFlattener {
            omit_nil_values: true,
            slice_strategy,
        }
    }

    pub fn keep_nil_values(mut self) -> JsonFlattener {
        self.omit_nil_values = false;
        self
    }

    fn flatten(&self, key: &str, value: &Value, destination: &mut Record) -> Result<(), FlattenError> {
        match value {
            Value::Object(inner) => {
                for (k, v) in inner {
                    let child = reformat(k);
                    let composite = if key.is_empty() {
                        child
                    } else {
                        format!("{key}_{child}")
                    };
                    self.flatten(&composite, v, destination)?;
                }
            }
            Value::Array(values) => {
                if key.contains(SQL_TYPE_KEYWORD) {
                    // meta field. value must be left untouched.
                    destination.insert(key.to_string(), value.clone());
                    return Ok(());
                }
                let flattened =
                    self.slice_strategy
                        .flatten_slice(values)
                        .map_err(|source| FlattenError::Slice {
                            key: key.to_string(),
                            source,
                        })?;
                destination.insert(key.to_string(), flattened);
            }
            Value::Null => {
                if !self.omit_nil_values {
                    destination.insert(key.to_string(), Value::Null);
                }
            }
            scalar => {
                destination.insert(key.to_string(), scalar.clone());
            }
        }

        Ok(())
    }
}

impl Flattener for JsonFlattener {
    fn flatten_object(&self, record: &Record) -> Result<Record, FlattenError> {
        let mut destination = Record::new();
        self.flatten("", &Value::Object(record.clone()), &mut destination)?;
        Ok(destination)
    }
}

/// Lowercases the key and replaces every code point outside ASCII letters
/// and digits with `_`. Leading, trailing and consecutive underscores are
/// preserved.
pub fn reformat(key: &str) -> String {
    key.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn reformat_examples() {
        assert_eq!(reformat("(key1)"), "_key1_");
        assert_eq!(reformat("$x"), "_x");
        assert_eq!(reformat("UserID"), "userid");
        assert_eq!(reformat("utm-source"), "utm_source");
        assert_eq!(reformat("__ok__"), "__ok__");
    }

    #[test]
    fn reformat_is_idempotent_and_stays_in_charset() {
        for key in ["(key1)", "$x", "Смысл", "a b\tc", "имя.поля"] {
            let once = reformat(key);
            assert_eq!(reformat(&once), once);
            assert!(once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }
    }

    #[test]
    fn flattens_nested_objects_with_composite_keys() {
        let input = record(json!({
            "key1": {"key2": 123, "key3": {"key4": "x"}},
            "top": true,
        }));

        let flat = JsonFlattener::default().flatten_object(&input).unwrap();

        assert_eq!(flat["key1_key2"], json!(123));
        assert_eq!(flat["key1_key3_key4"], json!("x"));
        assert_eq!(flat["top"], json!(true));
    }

    #[test]
    fn arrays_become_json_strings_by_default() {
        let input = record(json!({"tags": ["a", "b", 3]}));

        let flat = JsonFlattener::default().flatten_object(&input).unwrap();
        assert_eq!(flat["tags"], json!(r#"["a","b",3]"#));
    }

    #[test]
    fn sql_type_meta_arrays_pass_through_untouched() {
        let input = record(json!({"field__sql_type_hint": ["varchar(42)", "text"]}));

        let flat = JsonFlattener::default().flatten_object(&input).unwrap();
        assert_eq!(flat["field__sql_type_hint"], json!(["varchar(42)", "text"]));
    }

    #[test]
    fn nil_values_are_omitted_by_default() {
        let input = record(json!({"a": null, "b": 1}));

        let flat = JsonFlattener::default().flatten_object(&input).unwrap();
        assert!(!flat.contains_key("a"));
        assert_eq!(flat["b"], json!(1));

        let kept = JsonFlattener::default()
            .keep_nil_values()
            .flatten_object(&input)
            .unwrap();
        assert_eq!(kept["a"], Value::Null);
    }

    #[test]
    fn flatten_is_idempotent_without_arrays() {
        let input = record(json!({
            "User": {"Geo": {"City": "berlin"}},
            "$event": "pageview",
            "count": 2,
        }));

        let flattener = JsonFlattener::default();
        let once = flattener.flatten_object(&input).unwrap();
        let twice = flattener.flatten_object(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn failing_slice_strategy_names_the_key() {
        struct Failing;
        impl SliceStrategy for Failing {
            fn flatten_slice(&self, _values: &[Value]) -> anyhow::Result<Value> {
                anyhow::bail!("nope")
            }
        }

        let input = record(json!({"outer": {"items": [1, 2]}}));
        let err = JsonFlattener::new(Box::new(Failing))
            .flatten_object(&input)
            .unwrap_err();

        assert!(err.to_string().contains("outer_items"));
    }
}
