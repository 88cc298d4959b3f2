//! Routes DML events to handlers and drives their periodic drains

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::handlers::{
    AnnotationCacheHandler, DmlEventHandler, LastUpdatedHandler, SpanCacheHandler,
};
use super::{DmlEvent, DmlEventKind, LastUpdatedAt};
use crate::data::{CacheService, SqliteService};

/// In-process event bus
///
/// The routing table is built once: for each concrete event kind it lists
/// the handlers registered for that kind, then those registered for each
/// supertype in order.
pub struct DmlEventDispatcher {
    handlers: Vec<Arc<dyn DmlEventHandler>>,
    routes: HashMap<DmlEventKind, Vec<Arc<dyn DmlEventHandler>>>,
    flush_interval: Duration,
}

impl DmlEventDispatcher {
    pub fn new(handlers: Vec<Arc<dyn DmlEventHandler>>, flush_interval: Duration) -> Self {
        let routes = DmlEventKind::CONCRETE
            .iter()
            .map(|concrete| {
                let routed = concrete
                    .ancestry()
                    .into_iter()
                    .flat_map(|kind| handlers.iter().filter(move |h| h.kind() == kind))
                    .cloned()
                    .collect::<Vec<_>>();
                (*concrete, routed)
            })
            .collect();

        Self {
            handlers,
            routes,
            flush_interval,
        }
    }

    /// Dispatcher with the standard handler set: last-updated bookkeeping
    /// plus span, span annotation, trace annotation and document annotation
    /// cache invalidation.
    pub fn with_default_handlers(
        db: Arc<SqliteService>,
        cache: Arc<CacheService>,
        last_updated: Arc<LastUpdatedAt>,
        flush_interval: Duration,
    ) -> Self {
        let handlers: Vec<Arc<dyn DmlEventHandler>> = vec![
            Arc::new(LastUpdatedHandler::new(last_updated)),
            Arc::new(SpanCacheHandler::new(cache.clone())),
            Arc::new(AnnotationCacheHandler::span(db.clone(), cache.clone())),
            Arc::new(AnnotationCacheHandler::trace(db.clone(), cache.clone())),
            Arc::new(AnnotationCacheHandler::document(db, cache)),
        ];
        Self::new(handlers, flush_interval)
    }

    /// Hand an event to every handler routed for its kind
    pub fn put(&self, event: &DmlEvent) {
        if event.ids().is_empty() {
            return;
        }
        if let Some(handlers) = self.routes.get(&event.kind()) {
            for handler in handlers {
                handler.put(event);
            }
        }
    }

    /// Handler names routed for a kind, in dispatch order
    pub fn route(&self, kind: DmlEventKind) -> Vec<&'static str> {
        self.routes
            .get(&kind)
            .map(|handlers| handlers.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    /// Drain every handler once
    pub async fn drain_all(&self) -> usize {
        let mut total = 0;
        for handler in &self.handlers {
            total += handler.drain().await;
        }
        total
    }

    /// Spawn one drain loop per handler
    ///
    /// Each loop drains once more after shutdown is signalled before exiting.
    pub fn start(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.handlers
            .iter()
            .map(|handler| {
                spawn_handler_loop(handler.clone(), self.flush_interval, shutdown_rx.clone())
            })
            .collect()
    }
}

fn spawn_handler_loop(
    handler: Arc<dyn DmlEventHandler>,
    flush_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::debug!(handler = handler.name(), "DML event handler started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    let handled = handler.drain().await;
                    if handled > 0 {
                        tracing::trace!(handler = handler.name(), handled, "Drained DML events");
                    }
                }
            }
        }

        let handled = handler.drain().await;
        tracing::debug!(
            handler = handler.name(),
            handled,
            "DML event handler shutdown complete"
        );
    })
}
