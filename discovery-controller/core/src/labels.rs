use std::{collections::BTreeMap, sync::Arc};

/// An immutable, shared set of labels attached to a workload.
#[derive(Clone, Debug, Default)]
pub struct Labels(Arc<Map>);

pub type Map = BTreeMap<String, String>;

/// A disjunction of label maps used to narrow instance queries.
///
/// An instance passes the filter when its labels are a superset of at least
/// one of the maps; the empty filter passes everything.
#[derive(Clone, Debug, Default)]
pub struct LabelFilter(Vec<Map>);

// === impl Labels ===

impl Labels {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every entry of `subset` is present with an equal value.
    pub fn contains_all(&self, subset: &Map) -> bool {
        subset
            .iter()
            .all(|(k, v)| self.0.get(k).map(|x| x == v).unwrap_or(false))
    }
}

impl From<Map> for Labels {
    #[inline]
    fn from(labels: Map) -> Self {
        Self(Arc::new(labels))
    }
}

impl std::cmp::PartialEq<Self> for Labels {
    #[inline]
    fn eq(&self, t: &Self) -> bool {
        self.0 == t.0
    }
}

impl std::cmp::Eq for Labels {}

impl std::iter::FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(Arc::new(iter.into_iter().collect()))
    }
}

impl std::iter::FromIterator<(&'static str, &'static str)> for Labels {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === impl LabelFilter ===

impl LabelFilter {
    pub fn new(maps: impl IntoIterator<Item = Map>) -> Self {
        Self(maps.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.is_empty() || self.0.iter().any(|m| labels.contains_all(m))
    }
}

impl std::iter::FromIterator<Map> for LabelFilter {
    fn from_iter<T: IntoIterator<Item = Map>>(iter: T) -> Self {
        Self::new(iter)
    }
}
