//! Concurrent process runner with fail-stop semantics.
//!
//! Every registered process gets a clone of one cancellation token. The first
//! process to stop (or a SIGINT/SIGTERM) cancels the token so the others wind
//! down, then closers run under a timeout. A process error makes the binary
//! exit non-zero, leaving the restart to the process supervisor.
//!
//! ```no_run
//! use telemetry_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_app_process("ticker", |ctx| async move {
//!             while !ctx.is_cancelled() {
//!                 tokio::time::sleep(Duration::from_secs(1)).await;
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type BoxedResultFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A long-lived process: runs until its token is cancelled or it fails
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// Cleanup run once every process has stopped
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Closer timeout defaults to 10 seconds
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Closers run concurrently; a failing closer does not stop the others
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Share an externally owned token, e.g. to trigger shutdown from outside
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run to completion with signal handling, then exit the process:
    /// code 1 if any process failed, 0 otherwise.
    pub async fn run(self) {
        spawn_signal_handlers(self.cancellation_token.clone());

        match self.run_until_stopped().await {
            Ok(()) => {
                info!("Application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                error!("Application exiting with error: {:#}", err);
                std::process::exit(1);
            }
        }
    }

    /// Run all processes until the first one stops or the token is cancelled,
    /// then run closers. Returns the first process error, if any.
    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            info!(process = %name, "Starting app process");
            join_set.spawn(async move { (name, process(process_token).await) });
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(process = %name, "App process stopped");
                }
                Ok((name, Err(err))) => {
                    error!(process = %name, "App process failed: {:#}", err);
                    first_error.get_or_insert(err.context(format!("process '{}' failed", name)));
                }
                Err(err) => {
                    error!("App process panicked: {}", err);
                    first_error.get_or_insert(anyhow::anyhow!("app process panicked: {}", err));
                }
            }

            // Any stopped process takes the rest down with it
            token.cancel();
        }

        run_closers(self.closers, self.closer_timeout).await;

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn run_closers(closers: Vec<Closer>, timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    info!("Running closers with timeout of {:?}", timeout);

    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(closer());
    }

    let drain = async {
        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => debug!("Closer completed successfully"),
                Ok(Err(err)) => error!("Closer error: {:#}", err),
                Err(err) => error!("Closer panicked: {}", err),
            }
        }
    };

    match tokio::time::timeout(timeout, drain).await {
        Ok(()) => info!("All closers completed"),
        Err(_) => error!("Closers timed out after {:?}", timeout),
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => error!("Error setting up signal handler: {}", err),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM signal");
                token.cancel();
            }
            Err(err) => error!("Error setting up SIGTERM handler: {}", err),
        }
    });
}
