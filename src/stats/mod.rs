//! Exporter-wide stats subsystem: interned tag keys, tag maps and the
//! registry of aggregation views served on `/metrics`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use prometheus::{Encoder, Registry, TextEncoder};

use crate::error::Error;

pub use view::View;

pub const DEFAULT_NAMESPACE: &str = "logexporter";

const MAX_NAME_LEN: usize = 255;
const MAX_TAG_VALUE_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 100;

/// Turns an arbitrary name into a Prometheus identifier: characters other
/// than ASCII letters and digits become `_`, and a leading digit or
/// underscore gets a `key` prefix.
pub fn sanitize(name: &str) -> String {
    let mut out = name
        .chars()
        .take(MAX_LABEL_LEN)
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>();

    match out.chars().next() {
        Some(c) if c.is_ascii_digit() => out.insert_str(0, "key_"),
        Some('_') => out.insert_str(0, "key"),
        _ => (),
    }

    out
}

fn is_printable_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

////////////////////////////////////////////////////////////////////////////////

/// Interned tag identifier. Two keys resolved from the same string by the
/// same [`Stats`] share one allocation. `label` is the sanitized form used
/// as the Prometheus label name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagKey {
    name: Arc<str>,
    label: Arc<str>,
}

impl TagKey {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn same_identity(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.name, &other.name)
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagValue(String);

impl TagValue {
    pub fn new(key: &TagKey, value: String) -> Result<Self, Error> {
        let reason = if value.len() > MAX_TAG_VALUE_LEN {
            Some("longer than 255 bytes")
        } else if !value.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            Some("not printable ascii")
        } else {
            None
        };

        match reason {
            None => Ok(Self(value)),
            Some(reason) => Err(Error::InvalidTagValue {
                key: key.name().to_owned(),
                reason,
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Tag context of a single measurement.
#[derive(Debug, Default)]
pub struct TagMap(BTreeMap<TagKey, TagValue>);

impl TagMap {
    /// Inserts the tag, overwriting an earlier value for the same key.
    pub fn upsert(&mut self, key: TagKey, value: TagValue) {
        self.0.insert(key, value);
    }

    pub fn get(&self, key: &TagKey) -> Option<&str> {
        self.0.get(key).map(TagValue::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////

pub struct Stats {
    namespace: String,
    registry: Registry,
    keys: Mutex<HashMap<String, TagKey>>,
    views: Mutex<HashSet<String>>,
}

impl Stats {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            registry: Registry::new(),
            keys: Mutex::new(HashMap::new()),
            views: Mutex::new(HashSet::new()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resolves a tag key, registering it on first use.
    pub fn tag_key(&self, name: &str) -> Result<TagKey, Error> {
        let mut keys = self.keys.lock();

        if let Some(key) = keys.get(name) {
            return Ok(key.clone());
        }

        if !is_printable_name(name) {
            return Err(Error::InvalidTagKey(name.to_owned()));
        }

        let key = TagKey {
            name: Arc::from(name),
            label: Arc::from(sanitize(name)),
        };
        keys.insert(name.to_owned(), key.clone());
        Ok(key)
    }

    /// Registers a sum-aggregated counter view. View names are unique after
    /// sanitizing and registrations are permanent.
    pub fn register_view(&self, name: &str, keys: &[TagKey]) -> Result<View, Error> {
        if !is_printable_name(name) {
            return Err(Error::InvalidViewName(name.to_owned()));
        }

        let metric = if self.namespace.is_empty() {
            sanitize(name)
        } else {
            sanitize(&format!("{}_{}", self.namespace, name))
        };

        let mut views = self.views.lock();

        if views.contains(&metric) {
            return Err(Error::ViewConflict(name.to_owned()));
        }

        let view = View::new(&metric, name, keys)?;

        match self.registry.register(Box::new(view.collector())) {
            Ok(()) => (),
            Err(prometheus::Error::AlreadyReg) => {
                return Err(Error::ViewConflict(name.to_owned()))
            }
            Err(err) => return Err(err.into()),
        }

        views.insert(metric);
        Ok(view)
    }

    /// Encodes every registered view in the Prometheus text format.
    pub fn gather(&self) -> Result<String, Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

mod view;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_keys_are_interned() {
        let stats = Stats::default();
        let first = stats.tag_key("host").expect("valid key");
        let second = stats.tag_key("host").expect("valid key");
        let other = stats.tag_key("pod").expect("valid key");

        assert!(first.same_identity(&second));
        assert!(!first.same_identity(&other));
    }

    #[test]
    fn invalid_tag_keys() {
        let stats = Stats::default();
        let long = "k".repeat(256);

        for name in &["", "tab\there", "höst", long.as_str()] {
            match stats.tag_key(name) {
                Err(Error::InvalidTagKey(key)) => assert_eq!(key, *name),
                other => panic!("expected invalid key for {:?}, got {:?}", name, other),
            }
        }
    }

    #[test]
    fn tag_key_labels_are_sanitized() {
        let stats = Stats::default();

        for (name, label) in &[
            ("host", "host"),
            ("k8s-pod", "k8s_pod"),
            ("app.kubernetes.io/name", "app_kubernetes_io_name"),
            ("1host", "key_1host"),
            ("_host", "key_host"),
            ("__reserved", "key__reserved"),
        ] {
            let key = stats.tag_key(name).unwrap();
            assert_eq!(key.name(), *name);
            assert_eq!(key.label(), *label);
        }
    }

    #[test]
    fn sanitize_truncates_long_names() {
        assert_eq!(sanitize(&"a".repeat(150)).len(), 100);
        assert_eq!(sanitize("my logs"), "my_logs");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn tag_values() {
        let stats = Stats::default();
        let key = stats.tag_key("host").unwrap();

        assert_eq!(TagValue::new(&key, "a b".into()).unwrap().as_str(), "a b");
        assert!(TagValue::new(&key, String::new()).is_ok());
        assert!(TagValue::new(&key, "x".repeat(255)).is_ok());
        assert!(TagValue::new(&key, "x".repeat(256)).is_err());
        assert!(TagValue::new(&key, "line\nbreak".into()).is_err());
        assert!(TagValue::new(&key, "ünïcode".into()).is_err());
    }

    #[test]
    fn upsert_overwrites() {
        let stats = Stats::default();
        let key = stats.tag_key("host").unwrap();
        let mut tags = TagMap::default();

        tags.upsert(key.clone(), TagValue::new(&key, "a".into()).unwrap());
        tags.upsert(key.clone(), TagValue::new(&key, "b".into()).unwrap());

        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get(&key), Some("b"));
    }

    #[test]
    fn duplicate_view_names_conflict() {
        let stats = Stats::default();
        let host = stats.tag_key("host").unwrap();

        stats.register_view("mylogs", &[host.clone()]).unwrap();

        match stats.register_view("mylogs", &[]) {
            Err(Error::ViewConflict(name)) => assert_eq!(name, "mylogs"),
            Err(err) => panic!("unexpected error: {}", err),
            Ok(_) => panic!("duplicate view registered"),
        }

        assert!(stats.register_view("other", &[host]).is_ok());
    }

    #[test]
    fn view_names_are_sanitized() {
        let stats = Stats::default();
        let pod = stats.tag_key("k8s-pod").unwrap();
        let view = stats.register_view("nginx.logs", &[pod.clone()]).unwrap();

        let mut tags = TagMap::default();
        tags.upsert(pod.clone(), TagValue::new(&pod, "p1".into()).unwrap());
        view.record(&tags).unwrap();

        assert_eq!(view.name(), "nginx.logs");
        assert!(stats
            .gather()
            .unwrap()
            .contains("logexporter_nginx_logs{k8s_pod=\"p1\"} 1"));
    }

    #[test]
    fn sanitized_view_names_conflict() {
        let stats = Stats::default();
        stats.register_view("my-logs", &[]).unwrap();

        match stats.register_view("my_logs", &[]) {
            Err(Error::ViewConflict(name)) => assert_eq!(name, "my_logs"),
            other => panic!("expected view conflict, got {:?}", other),
        }
    }

    #[test]
    fn unprintable_view_name_is_a_config_error() {
        let stats = Stats::default();

        for name in &["", "line\nbreak"] {
            let err = stats.register_view(name, &[]).unwrap_err();
            assert!(matches!(err, Error::InvalidViewName(ref n) if n == name));
            assert!(err.is_config_error());
        }

        assert!(stats.register_view("line break", &[]).is_ok());
    }

    #[test]
    fn colliding_labels_are_rejected() {
        let stats = Stats::default();
        let a = stats.tag_key("k8s-pod").unwrap();
        let b = stats.tag_key("k8s_pod").unwrap();

        let err = stats.register_view("pods", &[a, b]).unwrap_err();

        assert!(matches!(err, Error::LabelConflict { ref first, ref second, .. } if first == "k8s-pod" && second == "k8s_pod"));
        assert!(err.is_config_error());
        assert!(stats.register_view("pods", &[]).is_ok());
    }

    #[test]
    fn gather_renders_namespace() {
        let stats = Stats::default();
        let host = stats.tag_key("host").unwrap();
        let view = stats.register_view("mylogs", &[host.clone()]).unwrap();

        let mut tags = TagMap::default();
        tags.upsert(host.clone(), TagValue::new(&host, "a".into()).unwrap());
        view.record(&tags).unwrap();

        let text = stats.gather().unwrap();
        assert!(text.contains("# TYPE logexporter_mylogs counter"));
        assert!(text.contains("logexporter_mylogs{host=\"a\"} 1"));
    }
}
