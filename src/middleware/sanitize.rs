//! Strips database operator injection from request input.
//!
//! A key starting with `$` or containing `.` can smuggle a query operator or
//! a nested-field path into a document query. Such keys are removed from the
//! body (at any depth), from the query string and from the request headers.

use actix_web::http::header::HeaderName;
use futures_util::future::LocalBoxFuture;
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

lazy_static::lazy_static! {
    static ref PROHIBITED_KEY: Regex = Regex::new(r"^\$|\.").unwrap();
}

pub fn is_prohibited_key(key: &str) -> bool {
    PROHIBITED_KEY.is_match(key)
}

/// Removes prohibited keys from `value` in place. Returns how many were
/// removed.
pub fn sanitize_value(value: &mut JsonValue) -> usize {
    match value {
        JsonValue::Object(map) => {
            let before = map.len();
            map.retain(|key, _| !is_prohibited_key(key));
            let mut removed = before - map.len();
            for nested in map.values_mut() {
                removed += sanitize_value(nested);
            }
            removed
        }
        JsonValue::Array(items) => items.iter_mut().map(sanitize_value).sum(),
        _ => 0,
    }
}

/// Splits a bracketed query key (`price[$gt][0]`) into its segments.
fn key_segments(key: &str) -> impl Iterator<Item = &str> {
    key.split(['[', ']']).filter(|segment| !segment.is_empty())
}

pub fn is_prohibited_query_key(key: &str) -> bool {
    key_segments(key).any(is_prohibited_key)
}

pub struct OperatorSanitizer;

impl Stage for OperatorSanitizer {
    fn name(&self) -> &'static str {
        "operator-sanitize"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        let mut removed = exchange.body_mut().map(sanitize_value).unwrap_or(0);

        if exchange.query().iter().any(|(key, _)| is_prohibited_query_key(key)) {
            let query = exchange.query_mut();
            let before = query.len();
            query.retain(|(key, _)| !is_prohibited_query_key(key));
            removed += before - query.len();
        }

        let headers: Vec<HeaderName> = exchange
            .request()
            .headers()
            .keys()
            .filter(|name| is_prohibited_key(name.as_str()))
            .cloned()
            .collect();
        for name in headers {
            exchange.request_mut().headers_mut().remove(name);
            removed += 1;
        }

        if removed > 0 {
            log::warn!(
                "request {} from {}: removed {} prohibited key(s)",
                exchange.request_id(),
                exchange.client_key(),
                removed
            );
        }

        Box::pin(async { Ok(Flow::Continue) })
    }
}
