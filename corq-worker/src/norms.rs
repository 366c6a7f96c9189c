//! Cache of text-type norm tables
//!
//! Norms (sizes of text-type categories, e.g. tokens per document genre) are
//! expensive to extract and stable for a read-only corpus, so the worker
//! keeps them in an explicit cache object injected into the loop. The
//! contract is populate-on-miss; there is no invalidation.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct NormsCache {
    data: HashMap<(String, String), HashMap<String, i64>>,
}

impl NormsCache {
    pub fn new() -> Self {
        NormsCache {
            data: HashMap::new(),
        }
    }

    pub fn get(&self, corpus: &str, attr: &str) -> Option<&HashMap<String, i64>> {
        self.data.get(&(corpus.to_string(), attr.to_string()))
    }

    pub fn set(&mut self, corpus: &str, attr: &str, values: HashMap<String, i64>) {
        self.data
            .insert((corpus.to_string(), attr.to_string()), values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populate_and_lookup() {
        let mut cache = NormsCache::new();
        assert!(cache.get("syn2020", "doc.genre").is_none());

        let mut norms = HashMap::new();
        norms.insert("fiction".to_string(), 1200i64);
        cache.set("syn2020", "doc.genre", norms);

        let hit = cache.get("syn2020", "doc.genre").unwrap();
        assert_eq!(hit.get("fiction"), Some(&1200));
        // a different attribute of the same corpus is a separate entry
        assert!(cache.get("syn2020", "doc.txtype").is_none());
    }
}
