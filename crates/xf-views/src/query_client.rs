//! Per-surface query client
//!
//! A [`QueryClient`] turns every effective predicate it receives into a
//! query, runs it on the analytical engine in the background and hands the
//! decoded result to its surface. Each issued query carries a stamp; a
//! response is applied only while its stamp is still the latest one, so a
//! slow earlier query can never overwrite a newer result.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use xf_core::events::{QueryApplied, QueryFailed};
use xf_core::{AnalyticalEngine, EventBus, Expression, Query, SelectionConsumer, SelectionStore, SurfaceId};
use xf_data::ResultDecoder;

/// Builds the client's query for an effective predicate
pub type QueryTemplate = Box<dyn Fn(Option<&Expression>) -> Query + Send + Sync>;

/// Receives every applied result. `None` means the query matched no rows.
pub type ResultCallback<T> = Box<dyn Fn(Option<Arc<T>>) + Send + Sync>;

/// How an issued query ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    Applied { stamp: u64, rows: usize },
    /// Zero rows; the surface was told there is no data
    Empty { stamp: u64 },
    /// A newer query was issued before this one resolved
    Superseded { stamp: u64 },
    /// Engine or decode failure; the previous result stays in place
    Failed { stamp: u64 },
}

/// Something that can reload its full, unfiltered data
pub trait UnfilteredReload: Send + Sync {
    fn reload_unfiltered(&self);
}

struct ClientState<T> {
    /// Stamp of the most recently issued query
    issued: u64,
    predicate: Option<Expression>,
    current: Option<Arc<T>>,
}

struct ClientInner<D: ResultDecoder> {
    name: String,
    engine: Arc<dyn AnalyticalEngine>,
    runtime: Handle,
    template: QueryTemplate,
    decoder: D,
    on_result: ResultCallback<D::Output>,
    events: Option<Arc<EventBus>>,
    state: Mutex<ClientState<D::Output>>,
    /// Held while checking a stamp and applying, so applied results never
    /// arrive at the surface out of issue order
    delivery: Mutex<()>,
}

/// Query client owned by one surface
pub struct QueryClient<D: ResultDecoder> {
    inner: Arc<ClientInner<D>>,
}

/// Construction options for a [`QueryClient`]
pub struct ClientOptions {
    /// Name used in logs and events
    pub name: String,
    /// Identity the client is registered under when its surface also
    /// produces clauses
    pub identity: Option<SurfaceId>,
    pub engine: Arc<dyn AnalyticalEngine>,
    pub runtime: Handle,
    pub events: Option<Arc<EventBus>>,
}

impl<D: ResultDecoder> QueryClient<D> {
    /// Create a client that is not registered with any selection
    pub fn new(options: ClientOptions, template: QueryTemplate, decoder: D, on_result: ResultCallback<D::Output>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(ClientInner {
                name: options.name,
                engine: options.engine,
                runtime: options.runtime,
                template,
                decoder,
                on_result,
                events: options.events,
                state: Mutex::new(ClientState {
                    issued: 0,
                    predicate: None,
                    current: None,
                }),
                delivery: Mutex::new(()),
            }),
        })
    }

    /// Create a client and register it with `store` under `options.identity`.
    ///
    /// The store holds the client weakly; keep the returned `Arc` alive for
    /// as long as the surface should follow the selection.
    pub fn connect(
        store: &SelectionStore,
        options: ClientOptions,
        template: QueryTemplate,
        decoder: D,
        on_result: ResultCallback<D::Output>,
    ) -> Arc<Self> {
        let identity = options.identity.clone();
        let client = Self::new(options, template, decoder, on_result);
        store.register(identity, client.clone());
        client
    }

    /// Issue a query for `predicate`. Earlier in-flight queries keep running
    /// but their results will be discarded.
    pub fn request(&self, predicate: Option<Expression>) -> JoinHandle<QueryOutcome> {
        let inner = self.inner.clone();
        let query = (inner.template)(predicate.as_ref());

        let stamp = {
            let mut state = inner.state.lock();
            state.issued += 1;
            state.predicate = predicate;
            state.issued
        };
        debug!("{}: issuing query #{}", inner.name, stamp);

        let runtime = inner.runtime.clone();
        runtime.spawn(async move {
            let result = inner.engine.query(&query).await;
            inner.resolve(stamp, result)
        })
    }

    /// Re-issue the query for the last predicate received
    pub fn refresh(&self) -> JoinHandle<QueryOutcome> {
        let predicate = self.inner.state.lock().predicate.clone();
        self.request(predicate)
    }

    /// Latest applied result
    pub fn current(&self) -> Option<Arc<D::Output>> {
        self.inner.state.lock().current.clone()
    }

    /// Stamp of the most recently issued query
    pub fn sequence(&self) -> u64 {
        self.inner.state.lock().issued
    }

    /// Predicate of the most recently issued query
    pub fn predicate(&self) -> Option<Expression> {
        self.inner.state.lock().predicate.clone()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl<D: ResultDecoder> ClientInner<D> {
    fn resolve(&self, stamp: u64, result: anyhow::Result<arrow::record_batch::RecordBatch>) -> QueryOutcome {
        let _delivery = self.delivery.lock();

        if self.state.lock().issued != stamp {
            debug!("{}: discarding superseded result #{}", self.name, stamp);
            return QueryOutcome::Superseded { stamp };
        }

        let decoded = result.and_then(|batch| self.decoder.decode(&batch).map_err(anyhow::Error::from));
        let output = match decoded {
            Ok(output) => output.map(Arc::new),
            Err(err) => {
                warn!("{}: query #{} failed, keeping previous data: {:#}", self.name, stamp, err);
                if let Some(events) = &self.events {
                    events.publish(QueryFailed {
                        surface: self.name.clone(),
                        stamp,
                        error: format!("{err:#}"),
                    });
                }
                return QueryOutcome::Failed { stamp };
            }
        };

        let rows = output.as_deref().map(D::rows).unwrap_or(0);
        self.state.lock().current = output.clone();
        (self.on_result)(output);

        debug!("{}: applied result #{} ({} rows)", self.name, stamp, rows);
        if let Some(events) = &self.events {
            events.publish(QueryApplied {
                surface: self.name.clone(),
                stamp,
                rows,
            });
        }

        if rows == 0 {
            QueryOutcome::Empty { stamp }
        } else {
            QueryOutcome::Applied { stamp, rows }
        }
    }
}

impl<D: ResultDecoder> SelectionConsumer for QueryClient<D> {
    fn on_selection_change(&self, predicate: Option<&Expression>) {
        // Completion is observed through the result callback
        drop(self.request(predicate.cloned()));
    }
}

impl<D: ResultDecoder> UnfilteredReload for QueryClient<D> {
    fn reload_unfiltered(&self) {
        drop(self.request(None));
    }
}
