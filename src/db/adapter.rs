//! Query adapter: one logical contract, two placeholder dialects.
//!
//! Callers write statements with `?` placeholders. [`translate`] rewrites
//! them into the active engine's syntax (`$1, $2, ...` for the numbered
//! style, passthrough for the positional style) and validates the
//! parameter count locally, before any network round trip. [`normalize`]
//! assembles the uniform [`QueryResult`] from decoded rows.

use crate::error::{StoreError, StoreResult};
use crate::models::{ColumnMetadata, PlaceholderStyle, QueryRequest, QueryResult};
use serde_json::Value as JsonValue;

/// A statement rewritten for the active engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedQuery {
    pub text: String,
    pub placeholder_count: usize,
}

/// Rewrite a logical query for the given placeholder style.
///
/// The scan is quote-aware: `?` inside single-quoted, double-quoted, or
/// backtick-quoted regions is neither counted nor rewritten. Fails with a
/// parameter-mismatch query error when the placeholder count differs from
/// the parameter count.
pub fn translate(request: &QueryRequest, style: PlaceholderStyle) -> StoreResult<TranslatedQuery> {
    let mut out = String::with_capacity(request.text.len() + 8);
    let mut count = 0usize;
    let mut quote: Option<char> = None;

    for ch in request.text.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                '?' => {
                    count += 1;
                    match style {
                        PlaceholderStyle::Numbered => {
                            out.push('$');
                            out.push_str(&count.to_string());
                        }
                        PlaceholderStyle::Positional => out.push('?'),
                    }
                }
                _ => out.push(ch),
            },
        }
    }

    if count != request.params.len() {
        return Err(StoreError::param_mismatch(count, request.params.len()));
    }

    Ok(TranslatedQuery {
        text: out,
        placeholder_count: count,
    })
}

/// Assemble the uniform result shape from decoded rows.
pub fn normalize(
    fields: Vec<ColumnMetadata>,
    rows: Vec<serde_json::Map<String, JsonValue>>,
    execution_time_ms: u64,
) -> QueryResult {
    let row_count = rows.len() as u64;
    QueryResult {
        rows,
        row_count,
        fields,
        execution_time_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryErrorKind;
    use crate::models::QueryParam;

    fn request(text: &str, params: usize) -> QueryRequest {
        let mut req = QueryRequest::new(text);
        for i in 0..params {
            req = req.with_param(QueryParam::Int(i as i64));
        }
        req
    }

    #[test]
    fn test_numbered_rewrites_in_order() {
        let translated = translate(
            &request("SELECT * FROM t WHERE a = ? AND b = ?", 2),
            PlaceholderStyle::Numbered,
        )
        .unwrap();
        assert_eq!(translated.text, "SELECT * FROM t WHERE a = $1 AND b = $2");
        assert_eq!(translated.placeholder_count, 2);
    }

    #[test]
    fn test_positional_passes_through() {
        let text = "SELECT * FROM t WHERE a = ? AND b = ?";
        let translated = translate(&request(text, 2), PlaceholderStyle::Positional).unwrap();
        assert_eq!(translated.text, text);
        assert_eq!(translated.placeholder_count, 2);
    }

    #[test]
    fn test_question_mark_inside_quotes_ignored() {
        let translated = translate(
            &request("SELECT '?' AS lit, \"col?\" FROM t WHERE x = ?", 1),
            PlaceholderStyle::Numbered,
        )
        .unwrap();
        assert_eq!(
            translated.text,
            "SELECT '?' AS lit, \"col?\" FROM t WHERE x = $1"
        );
    }

    #[test]
    fn test_backtick_quoted_identifier_ignored() {
        let translated = translate(
            &request("SELECT `what?` FROM t WHERE id = ?", 1),
            PlaceholderStyle::Positional,
        )
        .unwrap();
        assert_eq!(translated.placeholder_count, 1);
    }

    #[test]
    fn test_doubled_quote_escape() {
        // 'it''s ?' leaves the scanner back outside after the escape pair,
        // so the literal's question mark stays untouched.
        let translated = translate(
            &request("SELECT 'it''s ?' WHERE a = ?", 1),
            PlaceholderStyle::Numbered,
        )
        .unwrap();
        assert_eq!(translated.text, "SELECT 'it''s ?' WHERE a = $1");
    }

    #[test]
    fn test_param_count_mismatch_fails_locally() {
        let err = translate(
            &request("SELECT * FROM t WHERE a = ? AND b = ?", 1),
            PlaceholderStyle::Numbered,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Query {
                kind: QueryErrorKind::ParamMismatch,
                ..
            }
        ));

        // Too many parameters is a mismatch too.
        let err = translate(&request("SELECT 1", 2), PlaceholderStyle::Positional).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Query {
                kind: QueryErrorKind::ParamMismatch,
                ..
            }
        ));
    }

    #[test]
    fn test_no_placeholders_no_params_ok() {
        let translated = translate(&request("SELECT 1", 0), PlaceholderStyle::Numbered).unwrap();
        assert_eq!(translated.text, "SELECT 1");
        assert_eq!(translated.placeholder_count, 0);
    }

    #[test]
    fn test_normalize_preserves_fields_and_count() {
        let fields = vec![ColumnMetadata::new("test", "INT4")];
        let mut row = serde_json::Map::new();
        row.insert("test".to_string(), serde_json::json!(1));
        let result = normalize(fields.clone(), vec![row], 4);
        assert_eq!(result.row_count, 1);
        assert_eq!(result.fields, fields);
        assert_eq!(result.rows[0]["test"], serde_json::json!(1));
    }
}
