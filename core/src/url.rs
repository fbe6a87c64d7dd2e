//! URL construction and header/parameter merging helpers.

use serde_json::{Map, Value};

use crate::http::{Headers, RequestBody};

/// Characters `encodeURIComponent` leaves untouched besides ASCII alphanumerics.
const UNRESERVED: &[u8] = b"-_.!~*'()";

/// Percent-encode `input` the way browsers encode a URI component.
pub fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        if byte.is_ascii_alphanumeric() || UNRESERVED.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn is_absolute(path: &str) -> bool {
    path.starts_with("http")
}

/// Text a query value is rendered as before it is appended.
fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(_) | Value::Array(_) => Some(encode_uri_component(&value.to_string())),
        other => Some(other.to_string()),
    }
}

/// Build the final request URL.
///
/// Absolute paths (starting with `http`) are used verbatim, anything else gets
/// `base_url` prepended. Query parameters are appended in map order; `null`
/// entries are skipped.
pub fn make_url(base_url: &str, path: &str, query: Option<&Map<String, Value>>) -> String {
    let mut url = if is_absolute(path) {
        path.to_string()
    } else {
        format!("{base_url}{path}")
    };

    let Some(query) = query else {
        return url;
    };

    // A `?` at index 0 is not treated as an existing query string.
    let mut has_query = url.find('?').is_some_and(|index| index > 0);
    for (key, value) in query {
        let Some(rendered) = query_value(value) else {
            continue;
        };
        url.push(if has_query { '&' } else { '?' });
        url.push_str(key);
        url.push('=');
        url.push_str(&rendered);
        has_query = true;
    }
    url
}

/// Merge two header maps; `right` wins on collisions.
///
/// When either side is absent the other one is returned unchanged.
pub fn merge_headers(left: Option<Headers>, right: Option<Headers>) -> Option<Headers> {
    match (left, right) {
        (None, right) => right,
        (left, None) => left,
        (Some(mut left), Some(right)) => {
            left.extend(right);
            Some(left)
        }
    }
}

/// Append `key=value` to `url` unless the key is already present.
pub fn append_get_url_params(url: &str, key: &str, value: &str) -> String {
    if url.contains(&format!("?{key}")) || url.contains(&format!("&{key}")) {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{key}={value}")
}

/// Add a field to a request body unless it is already set.
///
/// Forms gain the field when they lack it; JSON objects gain it when the key
/// is missing. Other bodies are returned as they are.
pub fn append_post_params(body: RequestBody, key: &str, value: Value) -> RequestBody {
    match body {
        RequestBody::Form(mut form) => {
            if !form.has(key) {
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                form.append(key, text);
            }
            RequestBody::Form(form)
        }
        RequestBody::Json(Value::Object(mut object)) => {
            object.entry(key.to_string()).or_insert(value);
            RequestBody::Json(Value::Object(object))
        }
        other => other,
    }
}
