//! Ordered request pipeline.
//!
//! A [`Pipeline`] is a fixed list of [`Stage`]s assembled once at startup.
//! Every request walks the list in registration order. A stage either lets
//! the request continue, answers it itself ([`Flow::Respond`]) or fails with
//! an [`AppError`]; both of the latter skip every later stage and the route
//! table. [`PipelineService`] adapts the pipeline to actix and is the only
//! place that turns failures into responses.

mod exchange;
mod service;

use std::sync::Arc;

use actix_web::HttpResponse;
use futures_util::future::LocalBoxFuture;

use crate::errors::AppError;

pub use exchange::{BodySource, Exchange};
pub use service::{PipelineFailure, PipelineService};

/// What a stage decided about the request.
pub enum Flow {
    Continue,
    Respond(HttpResponse),
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn process<'a>(&'a self, exchange: &'a mut Exchange) -> LocalBoxFuture<'a, Result<Flow, AppError>>;
}

/// When a registered stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mount {
    Always,
    /// Only for paths equal to the prefix or below it (`/a` matches `/a/b`,
    /// not `/ab`).
    Prefix(String),
}

impl Mount {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Mount::Always => true,
            Mount::Prefix(prefix) => {
                let prefix = prefix.trim_end_matches('/');
                match path.strip_prefix(prefix) {
                    Some(rest) => rest.is_empty() || rest.starts_with('/'),
                    None => false,
                }
            }
        }
    }
}

struct Registered {
    mount: Mount,
    stage: Box<dyn Stage>,
}

pub struct Pipeline {
    stages: Vec<Registered>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder { stages: Vec::new() }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|r| r.stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every applicable stage in order, stopping at the first one that
    /// does not continue.
    pub async fn run(&self, exchange: &mut Exchange) -> Result<Flow, AppError> {
        for registered in &self.stages {
            if !registered.mount.matches(exchange.path()) {
                continue;
            }
            match registered.stage.process(exchange).await {
                Ok(Flow::Continue) => {}
                Ok(flow @ Flow::Respond(_)) => {
                    log::debug!(
                        "request {} answered by stage {}",
                        exchange.request_id(),
                        registered.stage.name()
                    );
                    return Ok(flow);
                }
                Err(err) => {
                    log::debug!(
                        "request {} rejected by stage {}: {}",
                        exchange.request_id(),
                        registered.stage.name(),
                        err
                    );
                    return Err(err);
                }
            }
        }
        Ok(Flow::Continue)
    }
}

pub struct PipelineBuilder {
    stages: Vec<Registered>,
}

impl PipelineBuilder {
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Registered {
            mount: Mount::Always,
            stage: Box::new(stage),
        });
        self
    }

    pub fn stage_at(mut self, prefix: &str, stage: impl Stage + 'static) -> Self {
        self.stages.push(Registered {
            mount: Mount::Prefix(prefix.to_string()),
            stage: Box::new(stage),
        });
        self
    }

    /// Registers `stage` only when `enabled`.
    pub fn stage_if(self, enabled: bool, stage: impl Stage + 'static) -> Self {
        if enabled { self.stage(stage) } else { self }
    }

    pub fn build(self) -> Arc<Pipeline> {
        Arc::new(Pipeline {
            stages: self.stages,
        })
    }
}
