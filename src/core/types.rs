use serde::{
    Deserialize,
    Serialize,
};

use crate::core::hash::IndexMap;

pub type Integer = u64;

pub type Dictionary = IndexMap<String, Value>;

pub type List = Vec<Value>;

/// A dynamically-typed value carried in a WAMP message.
///
/// Application payloads (`arguments`, `arguments_keyword`, `details`,
/// `options`) are opaque to the session core and pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(Integer),
    Float(f64),
    String(String),
    List(List),
    Dictionary(Dictionary),
}

impl From<Integer> for Value {
    fn from(value: Integer) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Dictionary> for Value {
    fn from(value: Dictionary) -> Self {
        Self::Dictionary(value)
    }
}

impl From<List> for Value {
    fn from(value: List) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod value_test {
    use crate::core::types::{
        Dictionary,
        List,
        Value,
    };

    #[test]
    fn deserializes_arbitrary_json() {
        assert_matches::assert_matches!(
            serde_json::from_str::<Value>(r#"{"color":"orange","sizes":[23,42,7],"extra":null}"#),
            Ok(Value::Dictionary(dictionary)) => {
                assert_eq!(dictionary, Dictionary::from_iter([
                    ("color".to_owned(), Value::String("orange".to_owned())),
                    ("sizes".to_owned(), Value::List(List::from_iter([
                        Value::Integer(23),
                        Value::Integer(42),
                        Value::Integer(7),
                    ]))),
                    ("extra".to_owned(), Value::Null),
                ]));
            }
        );
        assert_matches::assert_matches!(
            serde_json::from_str::<Value>("2.5"),
            Ok(Value::Float(value)) => assert_eq!(value, 2.5)
        );
    }

    #[test]
    fn serializes_dictionaries_in_insertion_order() {
        let dictionary = Dictionary::from_iter([
            ("b".to_owned(), Value::Integer(1)),
            ("a".to_owned(), Value::Integer(2)),
        ]);
        assert_matches::assert_matches!(
            serde_json::to_string(&Value::Dictionary(dictionary)),
            Ok(serialized) => assert_eq!(serialized, r#"{"b":1,"a":2}"#)
        );
    }
}
