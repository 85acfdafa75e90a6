use futures_util::future::LocalBoxFuture;
use serde_json::Value as JsonValue;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

/// Escapes markup in user input so stored strings cannot open a tag when
/// rendered as HTML. Only `<` needs escaping for that.
pub fn escape_html(input: &str) -> String {
    input.replace('<', "&lt;")
}

fn needs_escape(input: &str) -> bool {
    input.contains('<')
}

/// Escapes every string in `value`. Keys are left alone.
pub fn clean_value(value: &mut JsonValue) {
    match value {
        JsonValue::String(s) if needs_escape(s) => *s = escape_html(s),
        JsonValue::Array(items) => items.iter_mut().for_each(clean_value),
        JsonValue::Object(map) => map.values_mut().for_each(clean_value),
        _ => {}
    }
}

pub struct XssClean;

impl Stage for XssClean {
    fn name(&self) -> &'static str {
        "xss-clean"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        if let Some(body) = exchange.body_mut() {
            clean_value(body);
        }

        if exchange.query().iter().any(|(_, value)| needs_escape(value)) {
            for (_, value) in exchange.query_mut().iter_mut() {
                if needs_escape(value) {
                    *value = escape_html(value);
                }
            }
        }

        Box::pin(async { Ok(Flow::Continue) })
    }
}
