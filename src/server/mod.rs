//! The server process.
//!
//! Owns the request FIFO, the worker pool and the CPU budget. A run goes:
//!
//! 1. set the CPU limit and start the budget watcher,
//! 2. create the FIFO and attach its read end,
//! 3. launch the interface and wait for it to connect,
//! 4. dispatch one worker per request until the sentinel,
//! 5. wait for the workers, report usage, reap the interface, remove the FIFO.

pub mod budget;
pub mod pool;
pub mod process;
pub mod termination;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

pub use budget::{BudgetState, BudgetWatcher, block_budget_signals, configure_cpu_limit};
pub use pool::{WorkOutcome, WorkerPool};
pub use process::{ProcessLauncher, ProducerProc};
pub use termination::{ProducerExit, TerminationReason};

use crate::cancel::CancelNotifier;
use crate::channel::{Fifo, InputPolicy, Request};
use crate::error::{FibError, Result};
use crate::status;
use crate::theme::Themed;
use crate::usage::ResourceUsage;

/// Starts the request producer once the FIFO exists.
pub trait ProducerLauncher {
    type Handle: ProducerHandle;

    fn launch(&self, pipe: &Path) -> Result<Self::Handle>;
}

/// A running request producer.
pub trait ProducerHandle {
    fn id(&self) -> u32;

    /// How to ask this producer to stop sending.
    fn notifier(&self) -> Box<dyn CancelNotifier>;

    /// Non-blocking liveness check.
    fn has_exited(&mut self) -> Result<bool>;

    /// Wait for the producer to end and report how it did.
    fn reap(&mut self) -> Result<ProducerExit>;
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Soft CPU-time limit in seconds.
    pub cpu_limit_secs: u64,
    /// Where the FIFO is created.
    pub pipe: PathBuf,
    /// Longest wait between drain progress reports.
    pub drain_interval: Duration,
    /// How often to check that the producer is alive while it connects.
    pub connect_poll: Duration,
    pub policy: InputPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cpu_limit_secs: 10,
            pipe: crate::paths::default_fifo_path(std::process::id()),
            drain_interval: Duration::from_secs(1),
            connect_poll: Duration::from_millis(100),
            policy: InputPolicy::Strict,
        }
    }
}

/// Counts from the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: usize,
    /// Requests dropped because the budget was exceeded.
    pub skipped: usize,
    pub malformed: usize,
    /// `false` if the channel closed without the sentinel.
    pub saw_sentinel: bool,
}

/// What a server run did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stats: DispatchStats,
    pub outcomes: Vec<WorkOutcome>,
    pub producer: ProducerExit,
    pub budget_exceeded: bool,
    pub usage: ResourceUsage,
    /// Usage of the reaped interface.
    pub producer_usage: ResourceUsage,
}

pub struct Server {
    config: ServerConfig,
    pool: WorkerPool,
    budget: Arc<BudgetState>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            pool: WorkerPool::new(),
            budget: Arc::new(BudgetState::new()),
        }
    }

    pub fn budget(&self) -> &Arc<BudgetState> {
        &self.budget
    }

    /// Full run: CPU limit, budget watcher, then [`Server::serve_channel`].
    ///
    /// Must be called from the main thread before any other thread exists,
    /// so every later thread inherits the blocked budget signals.
    pub fn run<L: ProducerLauncher>(&self, launcher: &L) -> Result<RunSummary> {
        block_budget_signals()?;
        status::server(format!(
            "Setting CPU limit to {}s",
            self.config.cpu_limit_secs.count()
        ));
        configure_cpu_limit(self.config.cpu_limit_secs)?;

        let mut watcher = BudgetWatcher::start(Arc::clone(&self.budget))?;
        let result = self.serve_channel(launcher);
        watcher.stop();
        result
    }

    /// Create the channel, launch the producer, serve it and shut down.
    pub fn serve_channel<L: ProducerLauncher>(&self, launcher: &L) -> Result<RunSummary> {
        let fifo = Fifo::create(&self.config.pipe)?;
        // Reader first: the producer's blocking write-side open then
        // completes immediately.
        let reader = fifo.open_read(self.config.policy)?;

        let mut producer = launcher.launch(fifo.path())?;
        status::server(format!("Started interface (pid {})", producer.id()));

        let requests = match reader.await_writer(self.config.connect_poll, || {
            producer.has_exited().map(|exited| !exited)
        }) {
            Ok(requests) => requests,
            Err(e) if producer.has_exited().unwrap_or(false) => {
                let exit = producer.reap()?;
                debug!(error = %e, "Producer gone before connecting");
                return Err(FibError::ProducerFailed(format!(
                    "{} before connecting to {}",
                    exit,
                    fifo.path().display()
                )));
            }
            Err(e) => return Err(e),
        };
        info!(pid = producer.id(), "Interface connected");

        // The producer has its cancellation handler by now; if the budget is
        // already gone this notifies right away.
        self.budget.attach_notifier(producer.notifier());

        let stats = self.dispatch(requests)?;

        self.pool.await_drain(self.config.drain_interval, |live| {
            status::server(format!("Waiting for {} workers", live.count()));
        });
        let outcomes = self.pool.take_outcomes();

        let usage = ResourceUsage::current()?;
        status::server(format!("Resource usage: {}", usage).muted());

        let exit = producer.reap()?;
        status::server(exit);
        let producer_usage = ResourceUsage::children()?;
        status::server(format!("Interface resource usage: {}", producer_usage).muted());
        if !exit.reason.is_success() {
            return Err(FibError::ProducerFailed(exit.to_string()));
        }

        fifo.remove()?;

        let summary = RunSummary {
            stats,
            outcomes,
            producer: exit,
            budget_exceeded: self.budget.is_exceeded(),
            usage,
            producer_usage,
        };
        info!(
            dispatched = summary.stats.dispatched,
            skipped = summary.stats.skipped,
            malformed = summary.stats.malformed,
            budget_exceeded = summary.budget_exceeded,
            "Server finished"
        );
        Ok(summary)
    }

    /// Read requests in order and start one worker per request.
    ///
    /// Stops at the sentinel or when the stream ends. Once the budget is
    /// exceeded, requests are still consumed but no longer dispatched.
    pub fn dispatch<I>(&self, requests: I) -> Result<DispatchStats>
    where
        I: IntoIterator<Item = Result<Request>>,
    {
        let mut stats = DispatchStats::default();

        for item in requests {
            match item {
                Ok(Request::Shutdown) => {
                    debug!("Received the sentinel");
                    stats.saw_sentinel = true;
                    break;
                }
                Ok(Request::Compute(n)) => {
                    if self.budget.is_exceeded() {
                        status::server(
                            format!("Not computing {}: CPU budget exceeded", n).warning(),
                        );
                        stats.skipped += 1;
                        continue;
                    }
                    status::server(format!("Received {} from interface", n.count()));
                    match ResourceUsage::current() {
                        Ok(usage) => status::server(format!("Usage so far: {}", usage).muted()),
                        Err(e) => debug!(error = %e, "Could not read resource usage"),
                    }
                    self.pool.submit(n)?;
                    status::server(format!("Created and detached the worker for {}", n.count()));
                    stats.dispatched += 1;
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "Skipping malformed request");
                    status::server(format!("Skipping request: {}", e).warning());
                    stats.malformed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if !stats.saw_sentinel {
            warn!("Channel closed without the sentinel");
        }
        Ok(stats)
    }

    /// Workers still running.
    pub fn live_workers(&self) -> usize {
        self.pool.live_workers()
    }
}
