//! Integration tests for the query adapter.
//!
//! These verify the translate/normalize contract: field names and row
//! counts survive the round trip unchanged regardless of the active
//! engine's placeholder style.

use datalink::db::adapter::{normalize, translate};
use datalink::error::{QueryErrorKind, StoreError};
use datalink::models::{ColumnMetadata, PlaceholderStyle, QueryParam, QueryRequest};

fn request(text: &str, param_count: usize) -> QueryRequest {
    let mut req = QueryRequest::new(text);
    for i in 0..param_count {
        req = req.with_param(QueryParam::Int(i as i64));
    }
    req
}

#[test]
fn translate_then_normalize_roundtrips_shape_for_both_styles() {
    let req = request("SELECT id, name FROM users WHERE id = ? AND active = ?", 2);

    for style in [PlaceholderStyle::Numbered, PlaceholderStyle::Positional] {
        let translated = translate(&req, style).expect("translation should succeed");
        assert_eq!(translated.placeholder_count, 2);

        // Simulate decoded rows coming back from either engine.
        let fields = vec![
            ColumnMetadata::new("id", "INT8"),
            ColumnMetadata::new("name", "VARCHAR"),
        ];
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), serde_json::json!(1));
        row.insert("name".to_string(), serde_json::json!("ada"));

        let result = normalize(fields.clone(), vec![row], 2);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.fields, fields);
        assert_eq!(result.rows[0]["name"], serde_json::json!("ada"));
    }
}

#[test]
fn numbered_style_rewrites_in_order_of_appearance() {
    let translated = translate(
        &request("INSERT INTO t (a, b, c) VALUES (?, ?, ?)", 3),
        PlaceholderStyle::Numbered,
    )
    .unwrap();
    assert_eq!(translated.text, "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)");
}

#[test]
fn positional_style_is_passthrough() {
    let text = "UPDATE t SET a = ? WHERE b = ?";
    let translated = translate(&request(text, 2), PlaceholderStyle::Positional).unwrap();
    assert_eq!(translated.text, text);
}

#[test]
fn placeholders_inside_literals_are_not_parameters() {
    let translated = translate(
        &request("SELECT * FROM t WHERE note = 'why?' AND id = ?", 1),
        PlaceholderStyle::Numbered,
    )
    .unwrap();
    assert_eq!(
        translated.text,
        "SELECT * FROM t WHERE note = 'why?' AND id = $1"
    );
    assert_eq!(translated.placeholder_count, 1);
}

#[test]
fn mismatched_parameter_count_fails_before_any_network_call() {
    let err = translate(
        &request("SELECT * FROM t WHERE a = ?", 3),
        PlaceholderStyle::Numbered,
    )
    .unwrap_err();

    match err {
        StoreError::Query { kind, .. } => assert_eq!(kind, QueryErrorKind::ParamMismatch),
        other => panic!("expected query error, got: {:?}", other),
    }
}

#[test]
fn normalize_keeps_decimal_text_untouched() {
    // The decode layer produces NUMERIC columns as strings; normalize must
    // carry them through without numeric coercion.
    let fields = vec![ColumnMetadata::new("amount", "NUMERIC")];
    let mut row = serde_json::Map::new();
    row.insert(
        "amount".to_string(),
        serde_json::json!("12345678901234567890.123456789"),
    );
    let result = normalize(fields, vec![row], 1);
    assert_eq!(
        result.rows[0]["amount"],
        serde_json::json!("12345678901234567890.123456789")
    );
}
