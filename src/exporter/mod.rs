use std::fmt::{Display, Write as _};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::Error;
use crate::labels::LabelMapping;
use crate::record::BatchDecoder;
use crate::stats::{Stats, TagMap, TagValue, View, DEFAULT_NAMESPACE};
use server::{MetricsServer, ServerState};

pub use server::DEFAULT_LISTEN_ADDRESS;

pub const DEFAULT_VIEW_NAME: &str = "log_count";

////////////////////////////////////////////////////////////////////////////////

/// One configured pairing of a label mapping and the view it records into.
#[derive(Debug)]
pub struct Instance {
    mapping: LabelMapping,
    view: View,
}

impl Instance {
    pub fn mapping(&self) -> &LabelMapping {
        &self.mapping
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Builds the tag context of a record. Fields without a mapping are
    /// ignored; a later field mapped to the same tag overwrites an earlier one.
    pub fn tags<I, K, V>(&self, fields: I) -> Result<TagMap, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        let mut tags = TagMap::default();

        if self.mapping.is_empty() {
            return Ok(tags);
        }

        let mut field = String::new();
        for (name, value) in fields {
            field.clear();
            write!(field, "{}", name).ok();

            if let Some(key) = self.mapping.tag_for(&field) {
                let value = TagValue::new(key, value.to_string())?;
                tags.upsert(key.clone(), value);
            }
        }

        Ok(tags)
    }

    pub fn record<I, K, V>(&self, fields: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        let tags = self.tags(fields)?;
        self.view.record(&tags)
    }

    fn record_logged<I, K, V>(&self, fields: I) -> bool
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        match self.record(fields) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, kind = err.kind(), view = self.view.name(), "Failed to record stats");
                false
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Owns the metrics endpoint and every instance created on it.
pub struct Exporter {
    stats: Arc<Stats>,
    server: Mutex<ServerState>,
    instances: RwLock<Vec<Arc<Instance>>>,
}

impl Exporter {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            stats: Arc::new(Stats::new(namespace)),
            server: Mutex::new(ServerState::Unstarted),
            instances: RwLock::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Starts serving `/metrics` and `/health`. An empty `listen` means the
    /// address already in use, or [`DEFAULT_LISTEN_ADDRESS`]. Starting again
    /// on the same address is a no-op.
    pub async fn start(&self, listen: &str) -> Result<(), Error> {
        let mut state = self.server.lock();

        match &*state {
            ServerState::Listening(server) => {
                if listen.is_empty() || listen == server.listen() {
                    Ok(())
                } else {
                    Err(Error::AddressConflict {
                        first: server.listen().to_owned(),
                        second: listen.to_owned(),
                    })
                }
            }
            ServerState::Stopped => Err(Error::Stopped),
            ServerState::Unstarted => {
                let listen = if listen.is_empty() {
                    DEFAULT_LISTEN_ADDRESS
                } else {
                    listen
                };

                let server = MetricsServer::bind(listen, self.stats.clone())?;
                *state = ServerState::Listening(server);
                Ok(())
            }
        }
    }

    /// Gracefully stops the endpoint, waiting up to `deadline` for in-flight
    /// scrapes. A stopped exporter cannot be started again. Stopping an
    /// exporter that never started does nothing.
    pub async fn stop(&self, deadline: Duration) -> Result<(), Error> {
        let server = {
            let mut state = self.server.lock();

            match std::mem::take(&mut *state) {
                ServerState::Listening(server) => {
                    *state = ServerState::Stopped;
                    server
                }
                other => {
                    *state = other;
                    return Ok(());
                }
            }
        };

        server.shutdown(deadline).await
    }

    /// Address the endpoint is bound to while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().local_addr()
    }

    /// Parses `labels`, registers the view and returns the new instance
    /// index. An empty `view_name` defaults to [`DEFAULT_VIEW_NAME`].
    pub fn create_instance(&self, labels: &str, view_name: &str) -> Result<usize, Error> {
        let mut instances = self.instances.write();

        let mapping = LabelMapping::parse(labels, &self.stats)?;
        let view_name = if view_name.is_empty() {
            DEFAULT_VIEW_NAME
        } else {
            view_name
        };
        let view = self.stats.register_view(view_name, mapping.keys())?;

        let index = instances.len();
        instances.push(Arc::new(Instance { mapping, view }));

        info!(index, view = view_name, labels, "Registered log view");
        Ok(index)
    }

    pub fn instance(&self, index: usize) -> Result<Arc<Instance>, Error> {
        self.instances
            .read()
            .get(index)
            .cloned()
            .ok_or(Error::UnknownInstance(index))
    }

    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Counts one record. Returns `Ok(false)` when the record was dropped
    /// because one of its tag values is invalid.
    pub fn record<I, K, V>(&self, index: usize, fields: I) -> Result<bool, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        Ok(self.instance(index)?.record_logged(fields))
    }

    /// Decodes a batch and counts each of its records. Returns how many
    /// records were counted.
    pub fn flush(&self, index: usize, data: &[u8]) -> Result<usize, Error> {
        let instance = self.instance(index)?;

        Ok(BatchDecoder::new(data)
            .filter(|record| instance.record_logged(record.fields()))
            .count())
    }
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

mod http;
mod server;
