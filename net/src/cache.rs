//! A cache of named nodes.
//!
//! Test runs juggle several clients and servers at once;
//! the cache hands out generated names (`client1`, `server2`, …)
//! when the author does not pick one,
//! and resolves a missing name to the most recently added node.

use snafu::{ensure, OptionExt};

use crate::error::{DuplicateNameSnafu, EmptyCacheSnafu, NoSuchNodeSnafu, Result};

/// Insertion-ordered storage of named nodes.
#[derive(Debug)]
pub struct NamedCache<T> {
    prefix: &'static str,
    entries: Vec<(String, T)>,
    next_index: usize,
}

impl<T> NamedCache<T> {
    /// Create a cache generating names from `prefix`.
    pub fn new(prefix: &'static str) -> Self {
        NamedCache {
            prefix,
            entries: Vec::new(),
            next_index: 1,
        }
    }

    /// Store a node under the given name, or under a generated one.
    /// Returns the name the node ended up with.
    pub fn add(&mut self, value: T, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => {
                ensure!(
                    self.entries.iter().all(|(existing, _)| existing != name),
                    DuplicateNameSnafu { name }
                );
                name.to_string()
            }
            None => {
                let name = format!("{}{}", self.prefix, self.next_index);
                self.next_index += 1;
                name
            }
        };
        self.entries.push((name.clone(), value));
        Ok(name)
    }

    /// The node under `name`, or the most recently added one.
    pub fn get(&self, name: Option<&str>) -> Result<&T> {
        match name {
            Some(name) => self
                .entries
                .iter()
                .find(|(existing, _)| existing == name)
                .map(|(_, value)| value)
                .context(NoSuchNodeSnafu { name }),
            None => self
                .entries
                .last()
                .map(|(_, value)| value)
                .context(EmptyCacheSnafu),
        }
    }

    /// Mutable access, same resolution as [`get`](Self::get).
    pub fn get_mut(&mut self, name: Option<&str>) -> Result<&mut T> {
        match name {
            Some(name) => self
                .entries
                .iter_mut()
                .find(|(existing, _)| existing == name)
                .map(|(_, value)| value)
                .context(NoSuchNodeSnafu { name }),
            None => self
                .entries
                .last_mut()
                .map(|(_, value)| value)
                .context(EmptyCacheSnafu),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut T)> {
        self.entries
            .iter_mut()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_index = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use matches::assert_matches;

    #[test]
    fn names_are_generated_in_sequence() {
        let mut cache = NamedCache::new("client");
        assert_eq!(cache.add(1, None).unwrap(), "client1");
        assert_eq!(cache.add(2, None).unwrap(), "client2");
        assert_eq!(cache.add(3, Some("special")).unwrap(), "special");
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn missing_name_resolves_to_the_most_recent() {
        let mut cache = NamedCache::new("server");
        cache.add(10, None).unwrap();
        cache.add(20, Some("old")).unwrap();
        assert_eq!(cache.get(None).unwrap(), &20);
        assert_eq!(cache.get(Some("server1")).unwrap(), &10);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut cache = NamedCache::new("client");
        cache.add(1, Some("twin")).unwrap();
        let err = cache.add(2, Some("twin")).unwrap_err();
        assert_matches!(err, Error::DuplicateName { .. });
    }

    #[test]
    fn empty_cache_reports_itself() {
        let cache: NamedCache<u8> = NamedCache::new("client");
        assert_matches!(cache.get(None).unwrap_err(), Error::EmptyCache);
        assert_matches!(
            cache.get(Some("client1")).unwrap_err(),
            Error::NoSuchNode { .. }
        );
    }
}
