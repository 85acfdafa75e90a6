use actix_web::{web::BytesMut, HttpMessage};
use futures_util::{future::LocalBoxFuture, StreamExt};
use serde_json::Value as JsonValue;

use crate::errors::AppError;
use crate::pipeline::{BodySource, Exchange, Flow, Stage};

/// Parses JSON request bodies. Only objects and arrays are accepted at the
/// top level; an empty body parses as `{}`.
pub struct JsonBody {
    limit: usize,
}

impl JsonBody {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

pub(crate) fn is_json(content_type: &str) -> bool {
    let content_type = content_type.trim().to_ascii_lowercase();
    content_type == "application/json" || content_type.ends_with("+json")
}

impl Stage for JsonBody {
    fn name(&self) -> &'static str {
        "json-body"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        Box::pin(async move {
            if !is_json(exchange.request().content_type()) {
                return Ok(Flow::Continue);
            }

            let mut payload = exchange.take_payload();
            let mut buf = BytesMut::new();
            while let Some(chunk) = payload.next().await {
                let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("Failed to read body: {}", e)))?;
                if buf.len() + chunk.len() > self.limit {
                    return Err(AppError::PayloadTooLarge { limit: self.limit });
                }
                buf.extend_from_slice(&chunk);
            }

            let value = if buf.iter().all(u8::is_ascii_whitespace) {
                JsonValue::Object(Default::default())
            } else {
                let value: JsonValue = serde_json::from_slice(&buf)
                    .map_err(|e| AppError::InvalidInput(format!("Malformed JSON body: {}", e)))?;
                if !(value.is_object() || value.is_array()) {
                    return Err(AppError::InvalidInput(
                        "JSON body must be an object or an array".to_string(),
                    ));
                }
                value
            };

            exchange.set_body(BodySource::Json, value);
            Ok(Flow::Continue)
        })
    }
}
