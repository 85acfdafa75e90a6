use actix_web::{
    http::{
        header::{self, HeaderValue},
        Method,
    },
    HttpResponse,
};
use futures_util::future::LocalBoxFuture;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Cross-origin access for any origin. Every `OPTIONS` request is answered
/// here with `204`; every other response gets
/// `Access-Control-Allow-Origin: *`.
pub struct Cors;

impl Stage for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        exchange.queue_header(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );

        let req = exchange.request();
        if req.method() != Method::OPTIONS {
            return Box::pin(async { Ok(Flow::Continue) });
        }

        let requested_headers = req
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned();

        exchange.queue_header(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        if let Some(requested) = requested_headers {
            exchange.queue_header(header::ACCESS_CONTROL_ALLOW_HEADERS, requested);
            exchange.append_header(
                header::VARY,
                HeaderValue::from_static("Access-Control-Request-Headers"),
            );
        }

        let response = HttpResponse::NoContent().finish();
        Box::pin(async move { Ok(Flow::Respond(response)) })
    }
}
