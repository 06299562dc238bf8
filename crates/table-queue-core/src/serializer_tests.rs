//! Tests for body serialization.

use super::*;
use serde_json::json;

#[test]
fn test_json_serializer_encodes_compactly() {
    let serializer = JsonSerializer;
    let body = serializer.serialize(&json!({"x": 1})).unwrap();
    assert_eq!(body, "{\"x\":1}");
}

#[test]
fn test_json_serializer_decodes() {
    let serializer = JsonSerializer;
    let value = serializer.deserialize("{\"to\":\"a@b.c\",\"n\":[1,2]}").unwrap();
    assert_eq!(value, json!({"to": "a@b.c", "n": [1, 2]}));
}

#[test]
fn test_invalid_body_is_error() {
    let serializer = JsonSerializer;
    let result = serializer.deserialize("not json");
    assert!(matches!(result, Err(SerializationError::Json(_))));
}
