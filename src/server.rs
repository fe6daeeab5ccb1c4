// src/server.rs
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::ServerConfig;
use crate::error::MazurkaResult;
use crate::reactor::Reactor;

/// A configured, bound server. `bind` claims the port; `serve` runs the
/// event loop on the calling thread until shutdown.
pub struct Server {
    config: ServerConfig,
    reactor: Reactor,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn bind(config: ServerConfig) -> MazurkaResult<Self> {
        config.validate()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let reactor = Reactor::new(&config, Arc::clone(&shutdown))?;
        Ok(Self {
            config,
            reactor,
            shutdown,
        })
    }

    /// The port actually bound; differs from the configured one when
    /// binding port 0.
    pub fn local_port(&self) -> MazurkaResult<u16> {
        self.reactor.local_port()
    }

    /// Flag observed by the event loop; setting it stops the server.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn serve(mut self) -> MazurkaResult<()> {
        let flag = Arc::clone(&self.shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::info!("received interrupt, shutting down");
            flag.store(true, Ordering::SeqCst);
        }) {
            // A second server in the same process (tests) cannot install
            // the handler twice; the shutdown handle still works.
            tracing::debug!(error = %e, "ctrl-c handler not installed");
        }

        tracing::info!(
            host = %self.config.host,
            port = self.local_port()?,
            root = %self.config.document_root.display(),
            workers = self.config.workers,
            "listening"
        );
        self.reactor.run()?;
        tracing::info!("server stopped");
        Ok(())
    }
}
