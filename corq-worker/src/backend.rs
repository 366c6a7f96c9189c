//! Computation backend contract and the table-file implementation
//!
//! The backend performs one unit of corpus computation per call. Calls must
//! be idempotent, share no mutable state and return within a time bounded
//! by corpus size; the worker imposes no internal timeout.
//!
//! `TableBackend` evaluates queries against per-partition JSON token tables
//! on disk. Corpus and partition paths arriving in job arguments point
//! directly at those table files.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use corq_common::error::{Error, Result};
use corq_common::proto::{CollFreqDataArgs, ConcSizeArgs, FreqDistribArgs, TextTypeNormsArgs};
use corq_common::results::{CollFreqData, ConcSize, FreqDistrib, FreqDistribItem};

/// Hard cap on frequency distribution rows a single call may return
pub const MAX_FREQ_RESULT_ITEMS: usize = 100;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn freq_distrib(
        &self,
        args: &FreqDistribArgs,
        norms: Option<&HashMap<String, i64>>,
    ) -> Result<FreqDistrib>;

    async fn conc_size(&self, args: &ConcSizeArgs) -> Result<ConcSize>;

    async fn coll_freq_data(&self, args: &CollFreqDataArgs) -> Result<CollFreqData>;

    async fn text_type_norms(&self, args: &TextTypeNormsArgs) -> Result<HashMap<String, i64>>;
}

/// One positional token record with its attribute values
#[derive(Debug, Clone, Deserialize)]
struct TokenRec {
    attrs: HashMap<String, String>,
    freq: i64,
}

/// On-disk shape of a corpus or partition table
#[derive(Debug, Deserialize)]
struct CorpusTable {
    corpus_size: i64,

    #[serde(default)]
    partition_size: Option<i64>,

    tokens: Vec<TokenRec>,

    /// struct attribute -> category value -> size in tokens
    #[serde(default)]
    norms: HashMap<String, HashMap<String, i64>>,
}

/// A single `attr="value"` condition of a parsed query
#[derive(Debug, PartialEq)]
struct QueryCond {
    attr: String,
    value: String,
}

/// Parse a positional query of the form `[attr="v" & attr2="v2" & ...]`
fn parse_query(query: &str) -> Result<Vec<QueryCond>> {
    let inner = query
        .trim()
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::InvalidInput(format!("malformed query: {}", query)))?;
    let mut conds = Vec::new();
    for clause in inner.split('&') {
        let (attr, value) = clause
            .split_once('=')
            .ok_or_else(|| Error::InvalidInput(format!("malformed query clause: {}", clause)))?;
        let value = value.trim().trim_matches('"');
        conds.push(QueryCond {
            attr: attr.trim().to_string(),
            value: value.to_string(),
        });
    }
    Ok(conds)
}

/// First token of a grouping criterion like `lemma 0` or `doc.genre 0`
pub fn crit_attr(crit: &str) -> &str {
    crit.split_whitespace().next().unwrap_or(crit)
}

pub struct TableBackend;

impl TableBackend {
    pub fn new() -> Self {
        TableBackend
    }

    fn load_table(&self, path: &str) -> Result<CorpusTable> {
        let raw = std::fs::read_to_string(Path::new(path))
            .map_err(|e| Error::Backend(format!("cannot open corpus table {}: {}", path, e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Backend(format!("cannot parse corpus table {}: {}", path, e)))
    }

    fn data_path<'a>(corpus_path: &'a str, partition_path: &'a Option<String>) -> &'a str {
        partition_path.as_deref().unwrap_or(corpus_path)
    }

    fn matches(token: &TokenRec, conds: &[QueryCond]) -> bool {
        conds
            .iter()
            .all(|c| token.attrs.get(&c.attr).map(String::as_str) == Some(c.value.as_str()))
    }
}

impl Default for TableBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for TableBackend {
    async fn freq_distrib(
        &self,
        args: &FreqDistribArgs,
        norms: Option<&HashMap<String, i64>>,
    ) -> Result<FreqDistrib> {
        let conds = parse_query(&args.query)?;
        let table = self.load_table(Self::data_path(&args.corpus_path, &args.partition_path))?;
        let group_attr = crit_attr(&args.crit);

        let mut conc_size = 0i64;
        let mut grouped: HashMap<String, i64> = HashMap::new();
        for token in &table.tokens {
            if !Self::matches(token, &conds) {
                continue;
            }
            conc_size += token.freq;
            if let Some(key) = token.attrs.get(group_attr) {
                *grouped.entry(key.clone()).or_insert(0) += token.freq;
            }
        }

        let mut freqs: Vec<FreqDistribItem> = grouped
            .into_iter()
            .filter(|(_, freq)| *freq >= args.freq_limit)
            .map(|(word, freq)| {
                let base = norms
                    .and_then(|n| n.get(&word).copied())
                    .unwrap_or(table.corpus_size);
                FreqDistribItem {
                    word,
                    freq,
                    base,
                    ipm: freq as f32 / base as f32 * 1e6,
                }
            })
            .collect();
        freqs.sort_by(|a, b| b.freq.cmp(&a.freq).then_with(|| a.word.cmp(&b.word)));

        let max_items = if args.max_items > 0 {
            args.max_items.min(MAX_FREQ_RESULT_ITEMS)
        } else {
            MAX_FREQ_RESULT_ITEMS
        };
        freqs.truncate(max_items);

        Ok(FreqDistrib {
            conc_size,
            corpus_size: table.corpus_size,
            partition_size: table.partition_size,
            freqs,
            fcrit: args.crit.clone(),
            error: None,
        })
    }

    async fn conc_size(&self, args: &ConcSizeArgs) -> Result<ConcSize> {
        let conds = parse_query(&args.query)?;
        let table = self.load_table(Self::data_path(&args.corpus_path, &args.partition_path))?;
        let total = table
            .tokens
            .iter()
            .filter(|t| Self::matches(t, &conds))
            .map(|t| t.freq)
            .sum();
        Ok(ConcSize {
            total,
            arf: 0.0,
            corpus_size: table.corpus_size,
            error: None,
        })
    }

    async fn coll_freq_data(&self, args: &CollFreqDataArgs) -> Result<CollFreqData> {
        let table = self.load_table(Self::data_path(&args.corpus_path, &args.partition_path))?;
        for attr in &args.attrs {
            if !table.tokens.iter().any(|t| t.attrs.contains_key(attr)) {
                return Err(Error::Backend(format!(
                    "attribute {} not present in corpus {}",
                    attr, args.corpus_path
                )));
            }
        }
        for strct in &args.structs {
            if !table.norms.contains_key(strct) {
                return Err(Error::Backend(format!(
                    "structure {} not present in corpus {}",
                    strct, args.corpus_path
                )));
            }
        }
        Ok(CollFreqData { error: None })
    }

    async fn text_type_norms(&self, args: &TextTypeNormsArgs) -> Result<HashMap<String, i64>> {
        let table = self.load_table(&args.corpus_path)?;
        table.norms.get(&args.struct_attr).cloned().ok_or_else(|| {
            Error::Backend(format!(
                "no norms for structural attribute {} in corpus {}",
                args.struct_attr, args.corpus_path
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_table(dir: &tempfile::TempDir, name: &str, raw: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(raw.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    const TABLE: &str = r#"{
        "corpus_size": 1000,
        "partition_size": 400,
        "tokens": [
            {"attrs": {"lemma": "team", "deprel": "nsubj", "p_upos": "VERB", "p_lemma": "win"}, "freq": 12},
            {"attrs": {"lemma": "team", "deprel": "obj", "p_upos": "VERB", "p_lemma": "beat"}, "freq": 5},
            {"attrs": {"lemma": "player", "deprel": "nsubj", "p_upos": "VERB", "p_lemma": "win"}, "freq": 3}
        ],
        "norms": {
            "doc.genre": {"sport": 600, "news": 400}
        }
    }"#;

    #[test]
    fn test_parse_query() {
        let conds = parse_query(r#"[lemma="team" & deprel="nsubj"]"#).unwrap();
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[0].attr, "lemma");
        assert_eq!(conds[0].value, "team");
        assert_eq!(conds[1].attr, "deprel");
        assert!(parse_query("lemma=team").is_err());
    }

    #[tokio::test]
    async fn test_freq_distrib_groups_by_crit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "c.json", TABLE);
        let backend = TableBackend::new();
        let ans = backend
            .freq_distrib(
                &FreqDistribArgs {
                    corpus_path: path,
                    query: r#"[deprel="nsubj"]"#.to_string(),
                    crit: "lemma 0".to_string(),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(ans.conc_size, 15);
        assert_eq!(ans.corpus_size, 1000);
        assert_eq!(ans.partition_size, Some(400));
        assert_eq!(ans.freqs.len(), 2);
        assert_eq!(ans.freqs[0].word, "team");
        assert_eq!(ans.freqs[0].freq, 12);
        assert_eq!(ans.freqs[0].ipm, 12.0 / 1000.0 * 1e6);
    }

    #[tokio::test]
    async fn test_freq_distrib_with_norms_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "c.json", TABLE);
        let backend = TableBackend::new();
        let mut norms = HashMap::new();
        norms.insert("team".to_string(), 500i64);
        let ans = backend
            .freq_distrib(
                &FreqDistribArgs {
                    corpus_path: path,
                    query: r#"[deprel="nsubj"]"#.to_string(),
                    crit: "lemma 0".to_string(),
                    is_text_types: true,
                    ..Default::default()
                },
                Some(&norms),
            )
            .await
            .unwrap();
        let team = ans.freqs.iter().find(|v| v.word == "team").unwrap();
        assert_eq!(team.base, 500);
        assert_eq!(team.ipm, 12.0 / 500.0 * 1e6);
    }

    #[tokio::test]
    async fn test_conc_size_counts_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "c.json", TABLE);
        let backend = TableBackend::new();
        let ans = backend
            .conc_size(&ConcSizeArgs {
                corpus_path: path,
                query: r#"[lemma="team"]"#.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ans.total, 17);
        assert_eq!(ans.corpus_size, 1000);
    }

    #[tokio::test]
    async fn test_text_type_norms() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(&dir, "c.json", TABLE);
        let backend = TableBackend::new();
        let norms = backend
            .text_type_norms(&TextTypeNormsArgs {
                corpus_path: path.clone(),
                struct_attr: "doc.genre".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(norms.get("sport"), Some(&600));

        let missing = backend
            .text_type_norms(&TextTypeNormsArgs {
                corpus_path: path,
                struct_attr: "doc.pubyear".to_string(),
            })
            .await;
        assert!(matches!(missing, Err(Error::Backend(_))));
    }

    #[tokio::test]
    async fn test_missing_table_is_backend_error() {
        let backend = TableBackend::new();
        let ans = backend
            .conc_size(&ConcSizeArgs {
                corpus_path: "/nonexistent/corpus.json".to_string(),
                query: r#"[lemma="x"]"#.to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(ans, Err(Error::Backend(_))));
    }
}
