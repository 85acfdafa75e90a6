use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{dev::Server, web, HttpServer};
use sea_orm::DatabaseConnection;
use tokio::sync::watch;

use crate::api::RouteTable;
use crate::app_state::{create_app, AppContext, AppState};
use crate::config::Config;
use crate::database;
use crate::errors::BootError;
use crate::middleware::build_pipeline;
use crate::supervisor::{Lifecycle, Supervisor};

/// A bound, not yet serving HTTP server together with its supervisor.
pub struct Application {
    server: Server,
    supervisor: Supervisor,
    addrs: Vec<SocketAddr>,
    mode: String,
}

impl Application {
    /// Connects to the database, then binds. A database that cannot be
    /// reached fails the boot before anything listens.
    pub async fn build(config: Config) -> Result<Self, BootError> {
        let db = database::connect(config.database_url.as_deref()).await?;
        Self::with_database(config, db, RouteTable::unmounted())
    }

    /// Binds using an already established connection and the given routes.
    pub fn with_database(
        config: Config,
        db: DatabaseConnection,
        routes: RouteTable,
    ) -> Result<Self, BootError> {
        let supervisor = Supervisor::new();
        let pipeline = build_pipeline(&config);
        log::debug!("request pipeline: {}", pipeline.stage_names().join(" -> "));

        let mode = config.mode().to_string();
        let host = config.host.clone();
        let port = config.port;
        let workers = config.effective_workers();

        let ctx = AppContext {
            state: web::Data::new(AppState { db, config }),
            pipeline,
            routes: Arc::new(routes),
            faults: supervisor.reporter(),
        };

        let server = HttpServer::new(move || create_app(&ctx))
            .workers(workers)
            .bind((host.as_str(), port))?;
        let addrs = server.addrs();

        Ok(Self {
            server: server.run(),
            supervisor,
            addrs,
            mode,
        })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn port(&self) -> u16 {
        self.addrs.first().map(|addr| addr.port()).unwrap_or_default()
    }

    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.supervisor.lifecycle()
    }

    /// Serves until the process is signalled or a fault is reported.
    pub async fn run(self) -> Result<(), BootError> {
        log::info!(
            "Server running in {} mode on port {}",
            self.mode,
            self.port()
        );
        self.supervisor.supervise(self.server).await
    }
}
