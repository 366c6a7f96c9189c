//! Log-Dice re-ranking of collocation candidates
//!
//! A raw relation distribution ranks candidates by rate alone, which favors
//! generic high-frequency collocates. Re-ranking scores each retained
//! candidate with `14 + log2(2*Fxy / (Fx + Fy))`, where Fx counts the pivot
//! within the relation, Fy the collocate alone and Fxy the joint occurrence.
//! Fx is computed once per request; Fy and Fxy require one sub-query per
//! candidate and run in parallel chunks.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use corq_common::config::SketchConfig;
use corq_common::error::{Error, Result};
use corq_common::proto::{ConcSizeArgs, Operation};
use corq_common::results::FreqDistrib;

use crate::colldb::{CollDatabase, CountKind};
use crate::dispatch::Dispatcher;
use crate::qgen::{QueryGenerator, Word};

/// One re-ranked collocation
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollocationCandidate {
    pub word: String,

    /// Fxy, the joint occurrence count
    pub joint_freq: i64,

    /// Fy, the collocate's own count within the relation
    pub context_freq: i64,

    pub score: f64,
}

pub fn log_dice(fx: i64, fy: i64, fxy: i64) -> f64 {
    14.0 + (2.0 * fxy as f64 / (fx as f64 + fy as f64)).log2()
}

#[derive(Clone)]
pub struct ReorderCalculator {
    dispatcher: Arc<Dispatcher>,
    qgen: Arc<dyn QueryGenerator>,
    coll_db: Option<Arc<CollDatabase>>,
    conf: SketchConfig,
}

impl ReorderCalculator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        qgen: Arc<dyn QueryGenerator>,
        coll_db: Option<Arc<CollDatabase>>,
        conf: SketchConfig,
    ) -> Self {
        ReorderCalculator {
            dispatcher,
            qgen,
            coll_db,
            conf,
        }
    }

    /// Re-rank a preliminary relation distribution for one pivot word.
    /// Any failed sub-query aborts the whole computation; there is no
    /// partially re-ranked result.
    pub async fn reorder(
        &self,
        corpus_path: &str,
        pivot: &Word,
        mut prelim: FreqDistrib,
    ) -> Result<Vec<CollocationCandidate>> {
        // keep the strongest candidates by rate; stable so equal rates
        // preserve their incoming order
        prelim
            .freqs
            .sort_by(|a, b| b.ipm.partial_cmp(&a.ipm).unwrap_or(std::cmp::Ordering::Equal));
        prelim.freqs.truncate(self.conf.prelim_sel_size);
        if prelim.freqs.is_empty() {
            return Ok(Vec::new());
        }
        let words: Vec<String> = prelim.freqs.iter().map(|v| v.word.clone()).collect();
        let n = words.len();

        let fx = self
            .conc_size(corpus_path, self.qgen.fx_query(pivot))
            .await?;
        debug!(pivot = %pivot.value, fx, candidates = n, "re-ranking collocations");

        let parallelism = self.conf.parallelism.max(1);
        let fy = Arc::new(Mutex::new(vec![0i64; n]));
        let fxy = Arc::new(Mutex::new(vec![0i64; n]));
        let chunk = (n + parallelism - 1) / parallelism;
        let (tx, mut rx) = mpsc::channel::<Result<()>>(2 * parallelism);

        let mut spawned = 0;
        for start in (0..n).step_by(chunk) {
            let end = (start + chunk).min(n);

            let calc = self.clone();
            let corpus = corpus_path.to_string();
            let chunk_words = words[start..end].to_vec();
            let out = Arc::clone(&fy);
            let done = tx.clone();
            tokio::spawn(async move {
                let outcome = calc
                    .fill_counts(&corpus, CountKind::Fy, None, &chunk_words, start, &out)
                    .await;
                let _ = done.send(outcome).await;
            });

            let calc = self.clone();
            let corpus = corpus_path.to_string();
            let chunk_words = words[start..end].to_vec();
            let pivot = pivot.clone();
            let out = Arc::clone(&fxy);
            let done = tx.clone();
            tokio::spawn(async move {
                let outcome = calc
                    .fill_counts(&corpus, CountKind::Fxy, Some(&pivot), &chunk_words, start, &out)
                    .await;
                let _ = done.send(outcome).await;
            });

            spawned += 2;
        }
        drop(tx);

        // each task reports exactly once; collect every report before
        // deciding the outcome so no sub-query is left dangling
        let mut first_err: Option<Error> = None;
        for _ in 0..spawned {
            match rx.recv().await {
                Some(Err(err)) => {
                    first_err.get_or_insert(err);
                }
                Some(Ok(())) => {}
                None => break,
            }
        }
        if let Some(err) = first_err {
            return Err(err);
        }

        let fy = fy.lock().await;
        let fxy = fxy.lock().await;
        let mut candidates: Vec<CollocationCandidate> = words
            .into_iter()
            .enumerate()
            .map(|(i, word)| CollocationCandidate {
                word,
                joint_freq: fxy[i],
                context_freq: fy[i],
                score: log_dice(fx, fy[i], fxy[i]),
            })
            .collect();
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.conf.result_size);
        Ok(candidates)
    }

    /// Compute counts for one contiguous chunk of candidates, writing them
    /// into the shared output at their global indices
    async fn fill_counts(
        &self,
        corpus_path: &str,
        kind: CountKind,
        pivot: Option<&Word>,
        chunk_words: &[String],
        offset: usize,
        out: &Mutex<Vec<i64>>,
    ) -> Result<()> {
        for (i, collocate) in chunk_words.iter().enumerate() {
            let (pivot_key, query) = match (kind, pivot) {
                (CountKind::Fxy, Some(pivot)) => {
                    (pivot.value.as_str(), self.qgen.fxy_query(pivot, collocate))
                }
                _ => ("", self.qgen.fy_query(collocate)),
            };
            let value = self
                .memoized_count(corpus_path, kind, pivot_key, collocate, query)
                .await?;
            out.lock().await[offset + i] = value;
        }
        Ok(())
    }

    async fn memoized_count(
        &self,
        corpus_path: &str,
        kind: CountKind,
        pivot_key: &str,
        collocate: &str,
        query: String,
    ) -> Result<i64> {
        if let Some(db) = &self.coll_db {
            if let Some(value) = db
                .get_count(corpus_path, self.qgen.relation(), kind, pivot_key, collocate)
                .await?
            {
                return Ok(value);
            }
        }
        let value = self.conc_size(corpus_path, query).await?;
        if let Some(db) = &self.coll_db {
            db.put_count(corpus_path, self.qgen.relation(), kind, pivot_key, collocate, value)
                .await?;
        }
        Ok(value)
    }

    async fn conc_size(&self, corpus_path: &str, query: String) -> Result<i64> {
        let reply = self
            .dispatcher
            .submit_and_wait(Operation::ConcSize(ConcSizeArgs {
                corpus_path: corpus_path.to_string(),
                partition_path: None,
                query,
            }))
            .await?;
        Ok(reply.result.into_conc_size()?.total)
    }
}
