use std::collections::HashMap;
use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{IntCounterVec, Opts};

use super::{TagKey, TagMap};
use crate::error::Error;

const DESCRIPTION: &str = "Number of lines of log output";

/// Handle to a registered counter view. Cloning is cheap and every clone
/// records into the same buckets.
#[derive(Clone)]
pub struct View {
    name: String,
    keys: Arc<[TagKey]>,
    counter: IntCounterVec,
}

impl View {
    pub(super) fn new(metric: &str, name: &str, keys: &[TagKey]) -> Result<Self, Error> {
        let mut labels: HashMap<&str, &TagKey> = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(first) = labels.insert(key.label(), key) {
                return Err(Error::LabelConflict {
                    label: key.label().to_owned(),
                    first: first.name().to_owned(),
                    second: key.name().to_owned(),
                });
            }
        }

        let labels = keys.iter().map(TagKey::label).collect::<Vec<_>>();
        let counter = IntCounterVec::new(Opts::new(metric, DESCRIPTION), &labels)?;

        Ok(Self {
            name: name.to_owned(),
            keys: keys.into(),
            counter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn keys(&self) -> &[TagKey] {
        &self.keys
    }

    /// Adds one to the bucket selected by `tags`. View keys absent from
    /// `tags` are recorded with an empty value.
    pub fn record(&self, tags: &TagMap) -> Result<(), Error> {
        let values = self.label_values(tags);
        self.counter.get_metric_with_label_values(&values)?.inc();
        Ok(())
    }

    /// Current value of the bucket selected by `tags`, zero when nothing was
    /// recorded under them. Reads a snapshot, so no bucket is created.
    pub fn count(&self, tags: &TagMap) -> u64 {
        let wanted = self
            .keys
            .iter()
            .map(|key| (key.label(), tags.get(key).unwrap_or("")))
            .collect::<HashMap<_, _>>();

        self.counter
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let pairs = metric.get_label();
                pairs.len() == wanted.len()
                    && pairs
                        .iter()
                        .all(|pair| wanted.get(pair.get_name()) == Some(&pair.get_value()))
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .unwrap_or(0)
    }

    pub(super) fn collector(&self) -> IntCounterVec {
        self.counter.clone()
    }

    fn label_values<'a>(&self, tags: &'a TagMap) -> Vec<&'a str> {
        self.keys
            .iter()
            .map(|key| tags.get(key).unwrap_or(""))
            .collect()
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("name", &self.name)
            .field("keys", &self.keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Stats, TagValue};
    use super::*;

    #[test]
    fn missing_tags_record_empty_values() {
        let stats = Stats::default();
        let host = stats.tag_key("host").unwrap();
        let pod = stats.tag_key("pod").unwrap();
        let view = stats
            .register_view("partial", &[host.clone(), pod.clone()])
            .unwrap();

        let mut tags = TagMap::default();
        tags.upsert(host.clone(), TagValue::new(&host, "a".into()).unwrap());
        view.record(&tags).unwrap();
        view.record(&tags).unwrap();

        assert_eq!(view.count(&tags), 2);
        assert!(stats
            .gather()
            .unwrap()
            .contains("logexporter_partial{host=\"a\",pod=\"\"} 2"));
    }

    #[test]
    fn untagged_view() {
        let stats = Stats::default();
        let view = stats.register_view("log_count", &[]).unwrap();

        view.record(&TagMap::default()).unwrap();

        assert_eq!(view.name(), "log_count");
        assert!(view.keys().is_empty());
        assert_eq!(view.count(&TagMap::default()), 1);
        assert!(stats.gather().unwrap().contains("logexporter_log_count 1"));
    }

    #[test]
    fn count_does_not_create_series() {
        let stats = Stats::default();
        let host = stats.tag_key("host").unwrap();
        let view = stats.register_view("mylogs", &[host.clone()]).unwrap();

        let mut seen = TagMap::default();
        seen.upsert(host.clone(), TagValue::new(&host, "a".into()).unwrap());
        view.record(&seen).unwrap();

        let mut ghost = TagMap::default();
        ghost.upsert(host.clone(), TagValue::new(&host, "ghost".into()).unwrap());

        assert_eq!(view.count(&seen), 1);
        assert_eq!(view.count(&ghost), 0);

        let text = stats.gather().unwrap();
        assert!(text.contains("logexporter_mylogs{host=\"a\"} 1"));
        assert!(!text.contains("ghost"));
    }
}
