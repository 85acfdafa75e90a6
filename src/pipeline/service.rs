use std::cell::RefCell;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::{
    body::{EitherBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http::{
        header::{self, HeaderMap},
        StatusCode,
    },
    Error, HttpResponse, ResponseError,
};
use futures_util::future::{ready, FutureExt, LocalBoxFuture, Ready};

use super::{Exchange, Flow, Pipeline};
use crate::errors::{self, AppError};
use crate::supervisor::{Fault, FaultReporter};

/// Middleware running a [`Pipeline`] in front of the wrapped service.
///
/// The wrapped service is the route table; it only sees requests every stage
/// let through. Any failure, whether raised by a stage, returned by a handler
/// or produced by a panic, leaves through [`errors::render_any`] with the
/// request id and the queued headers attached. Panics are additionally
/// reported to the supervisor.
pub struct PipelineService {
    pipeline: Arc<Pipeline>,
    faults: FaultReporter,
}

impl PipelineService {
    pub fn new(pipeline: Arc<Pipeline>, faults: FaultReporter) -> Self {
        Self { pipeline, faults }
    }
}

impl<S, B> Transform<S, ServiceRequest> for PipelineService
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = PipelineMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PipelineMiddleware {
            service: Rc::new(service),
            pipeline: Arc::clone(&self.pipeline),
            faults: self.faults.clone(),
        }))
    }
}

pub struct PipelineMiddleware<S> {
    service: Rc<S>,
    pipeline: Arc<Pipeline>,
    faults: FaultReporter,
}

impl<S, B> Service<ServiceRequest> for PipelineMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let pipeline = Arc::clone(&self.pipeline);
        let faults = self.faults.clone();

        Box::pin(async move {
            let exchange = Exchange::new(req);
            let request_id = exchange.request_id().to_string();
            let published = Rc::new(RefCell::new(HeaderMap::new()));

            let dispatched = dispatch(exchange, service, pipeline, Rc::clone(&published));
            match AssertUnwindSafe(dispatched).catch_unwind().await {
                Ok(res) => res,
                Err(panic) => {
                    faults.report(Fault::from_panic(panic));
                    let headers = published.take();
                    Err(PipelineFailure::new(AppError::Internal.into(), request_id, headers).into())
                }
            }
        })
    }
}

/// A failure that has no request left to build a `ServiceResponse` from:
/// an error from the route table itself, a failed commit or a panic. actix
/// renders it through [`ResponseError`], so it carries the request id and
/// the queued headers.
#[derive(Debug)]
pub struct PipelineFailure {
    error: Error,
    trace_id: String,
    headers: HeaderMap,
}

impl PipelineFailure {
    fn new(error: Error, trace_id: String, headers: HeaderMap) -> Self {
        Self {
            error,
            trace_id,
            headers,
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl ResponseError for PipelineFailure {
    fn status_code(&self) -> StatusCode {
        self.error.as_response_error().status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let mut res = errors::render_any(&self.error, Some(&self.trace_id));
        apply_headers(res.headers_mut(), &self.headers);
        res
    }
}

async fn dispatch<S, B>(
    mut exchange: Exchange,
    service: Rc<S>,
    pipeline: Arc<Pipeline>,
    published: Rc<RefCell<HeaderMap>>,
) -> Result<ServiceResponse<EitherBody<B>>, Error>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    let request_id = exchange.request_id().to_string();

    let early = match pipeline.run(&mut exchange).await {
        Ok(Flow::Continue) => None,
        Ok(Flow::Respond(res)) => Some(res),
        Err(err) => Some(errors::render(&err, Some(&request_id))),
    };

    // Visible to the caller in case the route table panics.
    *published.borrow_mut() = exchange.queued_headers().clone();

    let (req, queued) = match exchange.commit() {
        Ok(committed) => committed,
        Err(err) => {
            let headers = published.take();
            return Err(PipelineFailure::new(err.into(), request_id, headers).into());
        }
    };

    // The router needs sole ownership of the request, so nothing may keep a
    // clone of it across `service.call`.
    let mut res = match early {
        Some(res) => req.into_response(res).map_into_right_body(),
        None => match service.call(req).await {
            Ok(res) if res.response().error().is_some() => {
                let rendered = res
                    .response()
                    .error()
                    .map(|err| errors::render_any(err, Some(&request_id)))
                    .unwrap_or_else(|| HttpResponse::InternalServerError().finish());
                res.into_response(rendered).map_into_right_body()
            }
            Ok(res) => res.map_into_left_body(),
            Err(err) => return Err(PipelineFailure::new(err, request_id, queued).into()),
        },
    };

    apply_headers(res.headers_mut(), &queued);
    Ok(res)
}

/// Copies queued headers onto the response without overriding values the
/// handler chose. `Vary` is merged instead.
fn apply_headers(target: &mut HeaderMap, queued: &HeaderMap) {
    for (name, value) in queued.iter() {
        if name == header::VARY {
            target.append(name.clone(), value.clone());
        } else if !target.contains_key(name) {
            target.insert(name.clone(), value.clone());
        }
    }
}
