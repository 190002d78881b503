use std::collections::BTreeMap;

const MAX_MESSAGE_BYTES: usize = 32 * 1024;
const MAX_HINT_BYTES: usize = 8 * 1024;
const MAX_FIELD_ERROR_BYTES: usize = 4 * 1024;

/// JSON body of every non-2xx API response.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_errors: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let suffix = "…(truncated)";
    let keep = max_bytes.saturating_sub(suffix.len()).max(1);
    let mut end = keep.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    let mut out = s[..end].to_string();
    out.push_str(suffix);
    out
}

impl ErrorPayload {
    pub fn new(
        code: &str,
        message: impl Into<String>,
        field_errors: Option<BTreeMap<String, String>>,
        hint: Option<String>,
    ) -> Self {
        let message = truncate_utf8(&message.into(), MAX_MESSAGE_BYTES);

        let field_errors = field_errors.map(|mut m| {
            for v in m.values_mut() {
                *v = truncate_utf8(v, MAX_FIELD_ERROR_BYTES);
            }
            m
        });

        let hint = hint.map(|h| truncate_utf8(&h, MAX_HINT_BYTES));

        Self {
            code: code.to_string(),
            message,
            field_errors,
            hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_message() {
        let long = "a".repeat(MAX_MESSAGE_BYTES + 1024);
        let p = ErrorPayload::new("runtime_failure", long, None, None);
        assert!(p.message.len() <= MAX_MESSAGE_BYTES);
        assert!(p.message.ends_with("…(truncated)"));
    }

    #[test]
    fn truncates_hint_and_field_errors() {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), "b".repeat(MAX_FIELD_ERROR_BYTES + 1024));
        let hint = Some("c".repeat(MAX_HINT_BYTES + 1024));
        let p = ErrorPayload::new("invalid_param", "msg", Some(fields), hint);

        let field = &p.field_errors.as_ref().unwrap()["x"];
        assert!(field.len() <= MAX_FIELD_ERROR_BYTES);
        assert!(field.ends_with("…(truncated)"));

        let hint = p.hint.as_deref().unwrap();
        assert!(hint.len() <= MAX_HINT_BYTES);
        assert!(hint.ends_with("…(truncated)"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let s = "é".repeat(40);
        let out = truncate_utf8(&s, 21);
        assert!(out.ends_with("…(truncated)"));
        assert!(out.len() <= 21);
        assert!(out.starts_with("ééé"));
    }

    #[test]
    fn omits_empty_optionals() {
        let v = serde_json::to_value(ErrorPayload::new("not_found", "gone", None, None)).unwrap();
        assert_eq!(v["code"], "not_found");
        assert!(v.get("hint").is_none());
        assert!(v.get("field_errors").is_none());
    }
}
