//! Resource tags.
use std::collections::{BTreeMap, HashMap};

/// Tags as written in a definition. Ordered, so state files diff cleanly.
pub type Tags = BTreeMap<String, String>;

/// Resource tags merged over the provider's default tags.
///
/// Resource tags win when both define a key.
pub fn merge(defaults: &Tags, tags: &Tags) -> Tags {
    let mut all = defaults.clone();
    all.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    all
}

/// The difference between two tag sets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagsDiff {
    /// Keys that are new or whose value changed.
    pub upsert: Tags,
    /// Keys that are no longer present.
    pub remove: Vec<String>,
}

impl TagsDiff {
    pub fn new(old: &Tags, new: &Tags) -> Self {
        let upsert = new
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let remove = old
            .keys()
            .filter(|k| !new.contains_key(*k))
            .cloned()
            .collect();
        TagsDiff { upsert, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}

/// Converts the SDK's tag maps, treating a missing map as no tags.
pub fn from_sdk(tags: Option<&HashMap<String, String>>) -> Tags {
    tags.map(|tags| tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

/// Converts to the SDK's tag maps, omitting empty ones.
pub fn to_sdk(tags: &Tags) -> Option<HashMap<String, String>> {
    if tags.is_empty() {
        None
    } else {
        Some(tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resource_tags_override_defaults() {
        let all = merge(
            &tags(&[("team", "infra"), ("env", "dev")]),
            &tags(&[("env", "prod")]),
        );
        assert_eq!(tags(&[("env", "prod"), ("team", "infra")]), all);
    }

    #[test]
    fn diff() {
        let old = tags(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let new = tags(&[("a", "1"), ("b", "20"), ("d", "4")]);
        let diff = TagsDiff::new(&old, &new);
        pretty_assertions::assert_eq!(
            TagsDiff {
                upsert: tags(&[("b", "20"), ("d", "4")]),
                remove: vec!["c".to_owned()],
            },
            diff
        );
        assert!(TagsDiff::new(&new, &new).is_empty());
    }

    #[test]
    fn empty_tags_are_omitted() {
        assert_eq!(None, to_sdk(&Tags::new()));
        assert_eq!(Tags::new(), from_sdk(None));
    }
}
