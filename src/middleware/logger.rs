use futures_util::future::LocalBoxFuture;

use crate::errors::AppError;
use crate::pipeline::{Exchange, Flow, Stage};

/// Development request log: one line per request, written before dispatch.
pub struct DevLogger;

impl Stage for DevLogger {
    fn name(&self) -> &'static str {
        "dev-logger"
    }

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>> {
        let req = exchange.request();
        log::info!(
            "{} {} (request_id={} client={})",
            req.method(),
            req.uri(),
            exchange.request_id(),
            exchange.client_key()
        );
        Box::pin(async { Ok(Flow::Continue) })
    }
}
