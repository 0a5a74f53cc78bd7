use alloy::rpc::types::Log;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainError, ChainSource};
use crate::dedup::SeenTransactions;
use crate::dispatch::{EventName, EventTable};
use crate::reconcilers::{Context, Effect, ReconcileError};
use crate::registry::SharedRegistry;

/// Poll cycles between heartbeat log lines
const HEARTBEAT_EVERY: u64 = 50;

/// A log resolved to a known event, ready for a worker
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    pub event: EventName,
    pub log: Log,
}

/// Reads the trailing block window and filters out everything already seen.
/// Sole producer of work; owns the idempotency filter.
pub struct Poller {
    chain: Arc<dyn ChainSource>,
    table: EventTable,
    registry: SharedRegistry,
    seen: SeenTransactions,
    window: u64,
    cycles: u64,
}

impl Poller {
    pub fn new(chain: Arc<dyn ChainSource>, table: EventTable, registry: SharedRegistry, window: u64) -> Self {
        Self {
            chain,
            table,
            registry,
            seen: SeenTransactions::new(),
            window,
            cycles: 0,
        }
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// One pass over `[head - window, head]`
    pub async fn poll_once(&mut self) -> Result<Vec<QueuedEvent>, ChainError> {
        let head = self.chain.block_number().await?;
        let from = head.saturating_sub(self.window);
        let addresses = self.registry.lock().await.watch_list();
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let logs = self.chain.logs(from, head, &addresses).await?;
        let mut events = Vec::new();
        for log in logs {
            let Some(event) = self.table.resolve(&log) else {
                continue;
            };
            let Some(tx_hash) = log.transaction_hash else {
                warn!(address = %log.address(), %event, "Log without a transaction hash, skipping");
                continue;
            };
            let block = log.block_number.unwrap_or(head);
            if self.seen.first_sighting(tx_hash, block) {
                events.push(QueuedEvent { event, log });
            }
        }

        // blocks below this floor are outside every future window
        let evicted = self.seen.evict_below(from.saturating_sub(self.window));
        if evicted > 0 {
            debug!("Evicted {} transactions from the seen set", evicted);
        }

        if !events.is_empty() {
            debug!("Blocks {}-{}: {} new events", from, head, events.len());
        }
        Ok(events)
    }

    /// Poll once, turning a failure into a reconnect attempt and an empty cycle.
    pub async fn cycle(&mut self) -> Vec<QueuedEvent> {
        self.cycles += 1;
        match self.poll_once().await {
            Ok(events) => events,
            Err(e) => {
                error!("Poll cycle {} failed: {}", self.cycles, e);
                match self.chain.reconnect().await {
                    Ok(()) => info!("Node reconnected"),
                    Err(e) => error!("Node reconnection failed: {}", e),
                }
                Vec::new()
            }
        }
    }

    async fn heartbeat(&self, queued: usize) {
        if self.cycles % HEARTBEAT_EVERY == 0 {
            let watched = self.registry.lock().await.watched();
            info!(
                "Heartbeat: cycle {}, watching {} addresses, {} events queued, {} transactions remembered",
                self.cycles,
                watched,
                queued,
                self.seen.len()
            );
        }
    }
}

/// Routes an event to its contract's reconciler and applies the outcome.
pub struct Dispatcher {
    ctx: Arc<Context>,
    registry: SharedRegistry,
}

impl Dispatcher {
    pub fn new(ctx: Arc<Context>, registry: SharedRegistry) -> Self {
        Self { ctx, registry }
    }

    /// Never fails: every error is logged and the event dropped.
    pub async fn dispatch(&self, item: QueuedEvent) {
        let address = item.log.address();
        let tx = item.log.transaction_hash.unwrap_or_default();

        let paper = self.registry.lock().await.lookup(&address);
        let Some(paper) = paper else {
            warn!(address = %address, event = %item.event, tx = %tx, "No reconciler for watched address, dropping event");
            return;
        };

        debug!(address = %address, kind = ?paper.kind, event = %item.event, tx = %tx, "Routing event");
        match paper.handle(&self.ctx, item.event, &item.log).await {
            Ok(Effect::None) => {}
            Ok(effect) => {
                let mut registry = self.registry.lock().await;
                if registry.apply(&effect) {
                    info!("{:?}: now listening to {} addresses", effect, registry.watched());
                }
            }
            Err(ReconcileError::Store(e)) if e.is_transient() => {
                error!(address = %address, event = %item.event, tx = %tx, "Store unavailable, event dropped: {}", e);
            }
            Err(e) => {
                error!(address = %address, event = %item.event, tx = %tx, "Error processing event: {}", e);
            }
        }
    }
}

/// Wait out the poll interval. Returns true when stop was signalled.
async fn sleep_or_stop(stop: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = stop.changed() => true,
    }
}

fn stopped(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}

pub struct Indexer {
    poller: Poller,
    dispatcher: Arc<Dispatcher>,
    poll_interval: Duration,
}

impl Indexer {
    pub fn new(
        ctx: Arc<Context>,
        registry: SharedRegistry,
        table: EventTable,
        window: u64,
        poll_interval: Duration,
    ) -> Self {
        let poller = Poller::new(ctx.chain.clone(), table, registry.clone(), window);
        Self {
            poller,
            dispatcher: Arc::new(Dispatcher::new(ctx, registry)),
            poll_interval,
        }
    }

    /// Poll, then handle every new event in order, then sleep.
    pub async fn run_sequential(mut self, mut stop: watch::Receiver<bool>) {
        info!("Indexer running sequentially, polling every {:?}", self.poll_interval);
        loop {
            if stopped(&stop) {
                break;
            }
            let events = self.poller.cycle().await;
            for item in events {
                self.dispatcher.dispatch(item).await;
            }
            self.poller.heartbeat(0).await;

            if sleep_or_stop(&mut stop, self.poll_interval).await {
                break;
            }
        }
        info!("Sequential indexer stopped after {} cycles", self.poller.cycles());
    }

    /// Poller task feeding `workers` consumer tasks through one unbounded queue.
    pub async fn run_pipeline(self, workers: usize, stop: watch::Receiver<bool>) {
        info!(
            "Indexer running with {} workers, polling every {:?}",
            workers, self.poll_interval
        );
        let (queue_tx, queue_rx) = async_channel::unbounded::<QueuedEvent>();
        let mut handles = Vec::with_capacity(workers + 1);

        for worker_id in 0..workers {
            let queue = queue_rx.clone();
            let dispatcher = self.dispatcher.clone();
            let mut stop = stop.clone();
            handles.push(tokio::spawn(async move {
                debug!("Worker {} started", worker_id);
                loop {
                    if stopped(&stop) {
                        break;
                    }
                    tokio::select! {
                        item = queue.recv() => match item {
                            Ok(item) => dispatcher.dispatch(item).await,
                            Err(_) => break,
                        },
                        _ = stop.changed() => break,
                    }
                }
                debug!("Worker {} stopped", worker_id);
            }));
        }
        drop(queue_rx);

        let mut poller = self.poller;
        let interval = self.poll_interval;
        let mut stop = stop;
        handles.push(tokio::spawn(async move {
            loop {
                if stopped(&stop) {
                    break;
                }
                for item in poller.cycle().await {
                    if queue_tx.send(item).await.is_err() {
                        warn!("Work queue closed, poller exiting");
                        return;
                    }
                }
                poller.heartbeat(queue_tx.len()).await;

                if sleep_or_stop(&mut stop, interval).await {
                    break;
                }
            }
            info!(
                "Poller stopped after {} cycles with {} events still queued",
                poller.cycles(),
                queue_tx.len()
            );
        }));

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Indexer task panicked: {}", e);
            }
        }
    }
}
