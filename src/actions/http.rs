//! HTTP (`get`/`post`/`put`) action handler.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::models::{Action, Message};
use crate::template;
use crate::template::substitute;

/// Default timeout for HTTP actions.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// User-facing error for network failures; the detailed error is logged only.
const GENERIC_ERROR: &str =
    "Sorry, an error occurred while processing your request. Please check the logs.";

/// Run an HTTP action. Always sets `_raw_http_status` and `_raw_http_output`
/// on the message; parsed JSON bodies feed `expose_json_fields`.
pub async fn handle(action: &Action, msg: &mut Message, client: &reqwest::Client) {
    let method = match action.action_type.to_lowercase().as_str() {
        "get" => Method::GET,
        "post" => Method::POST,
        "put" => Method::PUT,
        other => {
            error!(action = %action.name, "unsupported HTTP method '{other}'");
            return;
        }
    };

    let (url, err) = substitute(&action.url, &msg.vars);
    if let Some(err) = err {
        warn!(action = %action.name, "substitution in 'url': {err}");
    }
    let mut url = url.replace(' ', "%20");

    let mut request = if method == Method::GET && !action.query_data.is_empty() {
        let query = build_query(action, msg);
        url = if url.contains('?') {
            format!("{url}&{query}")
        } else {
            format!("{url}?{query}")
        };
        client.request(method, &url)
    } else {
        let mut req = client.request(method, &url);
        if !action.query_data.is_empty() {
            let body: Value = action
                .query_data
                .iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, msg)))
                .collect::<serde_json::Map<String, Value>>()
                .into();
            req = req.json(&body);
        }
        req
    };

    for (key, value) in &action.custom_headers {
        let (value, err) = substitute(value, &msg.vars);
        if let Some(err) = err {
            warn!(action = %action.name, header = %key, "substitution in header: {err}");
        }
        request = request.header(key, value);
    }

    let timeout = if action.timeout > 0 {
        Duration::from_secs(action.timeout)
    } else {
        DEFAULT_TIMEOUT
    };
    request = request.timeout(timeout);

    debug!(action = %action.name, url = %url, "running HTTP action");

    let response = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!(action = %action.name, url = %url, "HTTP request failed: {e}");
            msg.error = GENERIC_ERROR.to_string();
            msg.set_var("_raw_http_status", "0");
            msg.set_var("_raw_http_output", "");
            return;
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    msg.set_var("_raw_http_status", status.as_u16().to_string());
    msg.set_var("_raw_http_output", body.clone());

    if !status.is_success() {
        warn!(action = %action.name, status = status.as_u16(), "HTTP action returned non-2xx");
        msg.error = format!(
            "The '{}' action received HTTP status {}.",
            action.name,
            status.as_u16()
        );
    }

    if action.expose_json_fields.is_empty() {
        return;
    }
    let data: Value = match serde_json::from_str(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(action = %action.name, "response body is not JSON, cannot expose fields: {e}");
            return;
        }
    };

    for (name, expr) in &action.expose_json_fields {
        let (expr, err) = substitute(expr, &msg.vars);
        if let Some(err) = err {
            warn!(action = %action.name, field = %name, "substitution in field expression: {err}");
        }
        let tpl = template::wrap_bare_path(&expr);
        match template::render(&tpl, &data) {
            Ok(rendered) => {
                msg.set_var(name.clone(), html_unescape(&rendered));
            }
            Err(e) => {
                error!(action = %action.name, field = %name, "field template failed: {e}");
                msg.error = e.to_string();
            }
        }
    }
}

/// Build a GET query string from `query_data`, substituting variables into
/// values. Spaces encode as `%20`, never `+`.
fn build_query(action: &Action, msg: &Message) -> String {
    let mut pairs: Vec<(String, String)> = action
        .query_data
        .iter()
        .map(|(k, v)| {
            let raw = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let (value, _) = substitute(&raw, &msg.vars);
            (k.clone(), value)
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Substitute variables inside string values of a JSON body, recursively.
fn substitute_value(value: &Value, msg: &Message) -> Value {
    match value {
        Value::String(s) => {
            let (out, _) = substitute(s, &msg.vars);
            Value::String(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, msg)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_value(v, msg)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Percent-encode a query component. Unreserved characters pass through;
/// everything else (including space) becomes `%XX`.
fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Undo HTML entity escaping at the JSON-field sink.
fn html_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Service;
    use serde_json::json;

    #[test]
    fn url_encode_uses_percent20() {
        assert_eq!(url_encode("a b+c"), "a%20b%2Bc");
        assert_eq!(url_encode("plain-text_1.0~x"), "plain-text_1.0~x");
    }

    #[test]
    fn query_built_from_query_data() {
        let mut msg = Message::new(Service::Chat);
        msg.set_var("city", "New York");
        let action = Action {
            query_data: [
                ("q".to_string(), json!("${city}")),
                ("units".to_string(), json!("metric")),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        assert_eq!(build_query(&action, &msg), "q=New%20York&units=metric");
    }

    #[test]
    fn body_values_are_substituted_recursively() {
        let mut msg = Message::new(Service::Chat);
        msg.set_var("who", "alice");
        let body = json!({"user": "${who}", "nested": {"greeting": "hi ${who}"}, "n": 3});
        let out = substitute_value(&body, &msg);
        assert_eq!(
            out,
            json!({"user": "alice", "nested": {"greeting": "hi alice"}, "n": 3})
        );
    }

    #[test]
    fn html_unescape_handles_common_entities() {
        assert_eq!(
            html_unescape("&lt;a&gt; &quot;q&quot; &amp;amp;"),
            "<a> \"q\" &amp;"
        );
    }

    #[tokio::test]
    async fn network_error_sets_generic_error_and_vars() {
        let mut msg = Message::new(Service::Chat);
        let action = Action {
            name: "down".into(),
            action_type: "get".into(),
            // Closed port on localhost fails fast.
            url: "http://127.0.0.1:1/none".into(),
            timeout: 2,
            ..Default::default()
        };
        let client = reqwest::Client::new();
        handle(&action, &mut msg, &client).await;
        assert_eq!(msg.error, GENERIC_ERROR);
        assert_eq!(msg.var("_raw_http_status"), "0");
    }

    #[test]
    fn exposed_field_renders_against_body() {
        let data = json!({"main": {"temp": 21}, "name": "Oslo"});
        let tpl = template::wrap_bare_path(".main.temp");
        assert_eq!(template::render(&tpl, &data).unwrap(), "21");
    }
}
