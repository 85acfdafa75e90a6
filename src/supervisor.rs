//! Process lifecycle and the fault supervisor.
//!
//! Request handling never takes the process down directly. Anything that
//! decides the process can no longer be trusted (a panic inside a stage or a
//! route handler, a failed background job) sends a [`Fault`] through a
//! [`FaultReporter`]. The [`Supervisor`] owns the receiving side: on the first
//! fault it stops accepting connections, lets in-flight requests drain and
//! hands the fault back to `main`, which exits non-zero.

use std::any::Any;
use std::fmt;

use actix_web::dev::Server;
use tokio::sync::{mpsc, watch};

use crate::errors::BootError;

/// Process lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Initializing,
    Serving,
    ShuttingDown,
}

/// A process-fatal condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: String,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Builds a fault from a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Clone, Debug)]
pub struct FaultReporter {
    tx: mpsc::UnboundedSender<Fault>,
}

impl FaultReporter {
    pub fn report(&self, fault: Fault) {
        log::error!("fault reported: {}", fault);
        if self.tx.send(fault).is_err() {
            log::warn!("supervisor is gone, fault dropped");
        }
    }
}

pub struct Supervisor {
    rx: mpsc::UnboundedReceiver<Fault>,
    reporter: FaultReporter,
    lifecycle: watch::Sender<Lifecycle>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (lifecycle, _) = watch::channel(Lifecycle::Initializing);
        Self {
            rx,
            reporter: FaultReporter { tx },
            lifecycle,
        }
    }

    pub fn reporter(&self) -> FaultReporter {
        self.reporter.clone()
    }

    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn state(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Drives `server` until it stops on its own (OS signal) or a fault
    /// arrives. A fault stops the listener, waits for in-flight connections to
    /// finish and is returned as the error.
    pub async fn supervise(mut self, server: Server) -> Result<(), BootError> {
        let handle = server.handle();
        let mut running = actix_web::rt::spawn(server);
        self.advance(Lifecycle::Serving);

        tokio::select! {
            joined = &mut running => {
                self.advance(Lifecycle::ShuttingDown);
                match joined {
                    Ok(result) => result.map_err(BootError::from),
                    Err(e) => Err(BootError::Fault(Fault::new(format!("server task failed: {}", e)))),
                }
            }
            Some(fault) = self.rx.recv() => {
                log::error!("Error: {}", fault);
                self.advance(Lifecycle::ShuttingDown);
                handle.stop(true).await;
                match running.await {
                    Ok(Err(e)) => log::error!("server stopped with error: {}", e),
                    Err(e) => log::error!("server task failed while draining: {}", e),
                    Ok(Ok(())) => log::info!("in-flight requests drained"),
                }
                Err(BootError::Fault(fault))
            }
        }
    }

    fn advance(&self, next: Lifecycle) {
        self.lifecycle.send_if_modified(|current| {
            let allowed = matches!(
                (*current, next),
                (Lifecycle::Initializing, Lifecycle::Serving)
                    | (Lifecycle::Initializing, Lifecycle::ShuttingDown)
                    | (Lifecycle::Serving, Lifecycle::ShuttingDown)
            );
            if allowed {
                log::debug!("lifecycle {:?} -> {:?}", current, next);
                *current = next;
            }
            allowed
        });
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
