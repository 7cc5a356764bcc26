//! Parsing of `tag=field,...` label specifications.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::Error;
use crate::stats::{Stats, TagKey};

/// A parsed label specification: `(tag, field)` pairs in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSpec {
    pairs: Vec<(String, String)>,
}

impl LabelSpec {
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(tag, field)| (tag.as_str(), field.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromStr for LabelSpec {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let pairs = spec
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((tag, field)) if !tag.trim().is_empty() && !field.trim().is_empty() => {
                    Ok((tag.trim().to_owned(), field.trim().to_owned()))
                }
                _ => Err(Error::MalformedLabel(segment.to_owned())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { pairs })
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Record field name to tag key mapping. A field listed twice maps to the
/// last tag it was given; `keys` holds every distinct tag key still reachable
/// from a field, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct LabelMapping {
    fields: HashMap<String, TagKey>,
    keys: Vec<TagKey>,
}

impl LabelMapping {
    pub fn resolve(spec: &LabelSpec, stats: &Stats) -> Result<Self, Error> {
        let mut fields = HashMap::with_capacity(spec.pairs.len());
        let mut order = Vec::with_capacity(spec.pairs.len());

        for (tag, field) in spec.pairs() {
            let key = stats.tag_key(tag)?;
            order.push(key.clone());
            fields.insert(field.to_owned(), key);
        }

        let mut keys: Vec<TagKey> = Vec::with_capacity(order.len());
        for key in order {
            if fields.values().any(|k| *k == key) && !keys.contains(&key) {
                keys.push(key);
            }
        }

        Ok(Self { fields, keys })
    }

    pub fn parse(spec: &str, stats: &Stats) -> Result<Self, Error> {
        Self::resolve(&spec.parse()?, stats)
    }

    pub fn tag_for(&self, field: &str) -> Option<&TagKey> {
        self.fields.get(field)
    }

    pub fn keys(&self) -> &[TagKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
