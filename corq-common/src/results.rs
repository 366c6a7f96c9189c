//! Mergeable result types
//!
//! `FreqDistrib` is the canonical mergeable shape: partition-scoped partials
//! are combined with `merge_with`, which is commutative and associative so
//! partials may arrive in any order. The per-item invariant
//! `ipm = freq / base * 1e6` holds after every merge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One row of a frequency distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreqDistribItem {
    pub word: String,
    pub freq: i64,

    /// Normalization base the rate is computed against
    pub base: i64,

    /// Instances per million, i.e. `freq / base * 1e6`
    pub ipm: f32,
}

/// Frequency distribution of query matches, possibly scoped to one partition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreqDistrib {
    /// Number of matching concordance rows
    pub conc_size: i64,

    /// Always the size of the whole corpus, identical across all
    /// partitions of one corpus (even when the query ran on a partition)
    pub corpus_size: i64,

    /// Size of the partition the query ran on; only meaningful
    /// for a single-partition result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_size: Option<i64>,

    pub freqs: Vec<FreqDistribItem>,

    /// Echo of the grouping expression used
    #[serde(default)]
    pub fcrit: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FreqDistrib {
    pub fn find_item_mut(&mut self, word: &str) -> Option<&mut FreqDistribItem> {
        self.freqs.iter_mut().find(|v| v.word == word)
    }

    /// Merge an incoming partial into this accumulator.
    ///
    /// `corpus_size` is overwritten by the incoming value: all partitions of
    /// one corpus report the same total, and the assignment also bootstraps
    /// an accumulator starting at zero. A corpus resized mid-query would
    /// make partials disagree here; that inconsistency is inherited from the
    /// upstream semantics and deliberately not validated away.
    pub fn merge_with(&mut self, other: &FreqDistrib) {
        self.conc_size += other.conc_size;
        self.corpus_size = other.corpus_size;
        // a merged result no longer belongs to a single partition
        self.partition_size = None;
        if self.fcrit.is_empty() {
            self.fcrit = other.fcrit.clone();
        }
        for v2 in &other.freqs {
            match self.find_item_mut(&v2.word) {
                Some(v1) => {
                    v1.freq += v2.freq;
                    v1.ipm = v1.freq as f32 / v1.base as f32 * 1e6;
                }
                None => {
                    // incoming ipm is already consistent for a fresh item
                    self.freqs.push(v2.clone());
                }
            }
        }
    }

    pub fn sort_by_freq_desc(&mut self) {
        self.freqs.sort_by(|a, b| b.freq.cmp(&a.freq));
    }

    /// Truncate to at most `max_items` rows; a no-op when already shorter
    pub fn cut(&mut self, max_items: usize) {
        if self.freqs.len() > max_items {
            self.freqs.truncate(max_items);
        }
    }
}

/// Number of matches for a query, with the corpus size it relates to
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcSize {
    pub total: i64,

    /// Average reduced frequency, when the backend provides it
    #[serde(default)]
    pub arf: f64,

    pub corpus_size: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConcSize {
    pub fn ipm(&self) -> f64 {
        if self.corpus_size > 0 {
            self.total as f64 / self.corpus_size as f64 * 1e6
        } else {
            0.0
        }
    }
}

/// Marker result of the collocation support-data precalculation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollFreqData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sizes of text-type categories for one structural attribute
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextTypeNorms {
    pub corpus_path: String,
    pub struct_attr: String,
    pub norms: HashMap<String, i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generic failure reply for jobs that never reached a typed result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorResult {
    pub func: String,
    pub error: String,
}

/// Status record of one processed job; appended to a worker's JSONL
/// performance log and reported through the dispatcher's status writer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLog {
    pub worker_id: String,
    pub func: String,
    pub begin: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl JobLog {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(word: &str, freq: i64, base: i64) -> FreqDistribItem {
        FreqDistribItem {
            word: word.to_string(),
            freq,
            base,
            ipm: freq as f32 / base as f32 * 1e6,
        }
    }

    fn partial(conc_size: i64, items: Vec<FreqDistribItem>) -> FreqDistrib {
        FreqDistrib {
            conc_size,
            corpus_size: 1_000_000,
            freqs: items,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_numeric_law() {
        let mut acc = FreqDistrib::default();
        acc.merge_with(&partial(10, vec![item("work", 10, 1000)]));
        acc.merge_with(&partial(5, vec![item("work", 5, 1000)]));

        assert_eq!(acc.conc_size, 15);
        assert_eq!(acc.freqs.len(), 1);
        assert_eq!(acc.freqs[0].freq, 15);
        assert_eq!(acc.freqs[0].ipm, 15.0 / 1000.0 * 1e6);
        assert_eq!(acc.freqs[0].ipm, 15000.0);
    }

    #[test]
    fn test_merge_bootstraps_corpus_size() {
        let mut acc = FreqDistrib::default();
        assert_eq!(acc.corpus_size, 0);
        acc.merge_with(&partial(1, vec![]));
        assert_eq!(acc.corpus_size, 1_000_000);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let parts = vec![
            partial(10, vec![item("a", 10, 1000), item("b", 3, 1000)]),
            partial(7, vec![item("b", 7, 1000)]),
            partial(2, vec![item("c", 2, 1000), item("a", 1, 1000)]),
        ];

        let orders: Vec<Vec<usize>> = vec![
            vec![0, 1, 2],
            vec![2, 1, 0],
            vec![1, 0, 2],
            vec![2, 0, 1],
        ];
        let mut merged: Vec<FreqDistrib> = Vec::new();
        for order in orders {
            let mut acc = FreqDistrib::default();
            for idx in order {
                acc.merge_with(&parts[idx]);
            }
            acc.sort_by_freq_desc();
            merged.push(acc);
        }

        for m in &merged[1..] {
            assert_eq!(m.conc_size, merged[0].conc_size);
            assert_eq!(m.corpus_size, merged[0].corpus_size);
            let mut a = m.freqs.clone();
            let mut b = merged[0].freqs.clone();
            a.sort_by(|x, y| x.word.cmp(&y.word));
            b.sort_by(|x, y| x.word.cmp(&y.word));
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_merge_is_associative() {
        let p1 = partial(4, vec![item("a", 4, 2000)]);
        let p2 = partial(6, vec![item("a", 6, 2000)]);
        let p3 = partial(1, vec![item("b", 1, 2000)]);

        // (p1 + p2) + p3
        let mut left = FreqDistrib::default();
        left.merge_with(&p1);
        left.merge_with(&p2);
        left.merge_with(&p3);

        // p1 + (p2 + p3)
        let mut inner = FreqDistrib::default();
        inner.merge_with(&p2);
        inner.merge_with(&p3);
        let mut right = FreqDistrib::default();
        right.merge_with(&p1);
        right.merge_with(&inner);

        assert_eq!(left.conc_size, right.conc_size);
        let mut lf = left.freqs;
        let mut rf = right.freqs;
        lf.sort_by(|x, y| x.word.cmp(&y.word));
        rf.sort_by(|x, y| x.word.cmp(&y.word));
        assert_eq!(lf, rf);
    }

    #[test]
    fn test_cut_noop_when_short() {
        let mut d = partial(3, vec![item("a", 2, 100), item("b", 1, 100)]);
        d.cut(10);
        assert_eq!(d.freqs.len(), 2);
    }

    #[test]
    fn test_cut_keeps_first_n_in_order() {
        let mut d = partial(
            6,
            vec![item("a", 3, 100), item("b", 2, 100), item("c", 1, 100)],
        );
        d.cut(2);
        assert_eq!(d.freqs.len(), 2);
        assert_eq!(d.freqs[0].word, "a");
        assert_eq!(d.freqs[1].word, "b");
    }

    #[test]
    fn test_conc_size_ipm() {
        let cs = ConcSize {
            total: 250,
            corpus_size: 1_000_000,
            ..Default::default()
        };
        assert_eq!(cs.ipm(), 250.0);
        let empty = ConcSize::default();
        assert_eq!(empty.ipm(), 0.0);
    }
}
