use std::sync::Arc;

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    web, App, Error,
};
use sea_orm::DatabaseConnection;

use crate::api::{not_found, RouteTable};
use crate::config::Config;
use crate::pipeline::{Pipeline, PipelineService};
use crate::supervisor::FaultReporter;

/// Shared state handed to route groups through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Config,
}

/// Everything a worker needs to build its `App`. Built once, cloned into
/// each worker.
#[derive(Clone)]
pub struct AppContext {
    pub state: web::Data<AppState>,
    pub pipeline: Arc<Pipeline>,
    pub routes: Arc<RouteTable>,
    pub faults: FaultReporter,
}

pub fn create_app(
    ctx: &AppContext,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<EitherBody<BoxBody>>,
        Error = Error,
        InitError = (),
    > + use<>,
> {
    let routes = Arc::clone(&ctx.routes);
    App::new()
        .app_data(ctx.state.clone())
        .app_data(web::Data::new(ctx.faults.clone()))
        .configure(move |cfg| routes.configure(cfg))
        .default_service(web::to(not_found))
        .wrap(PipelineService::new(Arc::clone(&ctx.pipeline), ctx.faults.clone()))
}
