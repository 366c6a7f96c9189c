//! HTTP request handlers
//!
//! Each handler validates its query parameters, builds the typed operation
//! and runs it through the cache, the fan-out or the re-ranking pipeline.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use corq_common::error::Error;
use corq_common::proto::{ConcSizeArgs, FreqDistribArgs, Operation, QueryResult};
use corq_common::results::FreqDistrib;

use crate::api::{ApiError, AppState};
use crate::fanout;
use crate::qgen::Word;
use crate::reorder::CollocationCandidate;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreqsParams {
    /// Positional query
    q: String,
    /// Grouping criterion, e.g. `lemma 0`
    crit: String,
    #[serde(default)]
    flimit: i64,
    #[serde(default)]
    max_items: Option<usize>,
    /// Normalize against text-type norms of the criterion attribute
    #[serde(default)]
    text_types: bool,
}

#[derive(Debug, Deserialize)]
pub struct TermFrequencyParams {
    q: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermFrequencyResponse {
    total: i64,
    corpus_size: i64,
    ipm: f64,
}

#[derive(Debug, Deserialize)]
pub struct CollocationsParams {
    /// Pivot word
    w: String,
    #[serde(default)]
    pos: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CollocationsResponse {
    corpus: String,
    pivot: String,
    colls: Vec<CollocationCandidate>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/corpora/:corpus_id/freqs
pub async fn freq_distrib(
    State(state): State<AppState>,
    Path(corpus_id): Path<String>,
    Query(params): Query<FreqsParams>,
) -> Result<Json<FreqDistrib>, ApiError> {
    if params.q.trim().is_empty() {
        return Err(Error::InvalidInput("empty query".to_string()).into());
    }
    if params.crit.trim().is_empty() {
        return Err(Error::InvalidInput("empty criterion".to_string()).into());
    }
    let args = FreqDistribArgs {
        corpus_path: state.corpus_path(&corpus_id)?,
        partition_path: None,
        query: params.q,
        crit: params.crit,
        freq_limit: params.flimit,
        max_items: params.max_items.unwrap_or(0),
        is_text_types: params.text_types,
    };
    let base_op = Operation::FreqDistrib(args.clone());
    if let Some(cache) = &state.cache {
        if let Some(reply) = cache.get(&base_op)? {
            return Ok(Json(reply.result.into_freqs()?));
        }
    }

    let parts = state.partitions.list(&corpus_id)?;
    let ans = fanout::run_over_partitions(
        state.dispatcher.clone(),
        args,
        &parts,
        params.max_items,
    )
    .await?;
    if let Some(cache) = &state.cache {
        cache.put(&base_op, &QueryResult::FreqDistrib(ans.clone()))?;
    }
    Ok(Json(ans))
}

/// GET /api/v1/corpora/:corpus_id/term-frequency
pub async fn term_frequency(
    State(state): State<AppState>,
    Path(corpus_id): Path<String>,
    Query(params): Query<TermFrequencyParams>,
) -> Result<Json<TermFrequencyResponse>, ApiError> {
    if params.q.trim().is_empty() {
        return Err(Error::InvalidInput("empty query".to_string()).into());
    }
    let op = Operation::ConcSize(ConcSizeArgs {
        corpus_path: state.corpus_path(&corpus_id)?,
        partition_path: None,
        query: params.q,
    });
    if let Some(cache) = &state.cache {
        if let Some(reply) = cache.get(&op)? {
            let conc = reply.result.into_conc_size()?;
            return Ok(Json(TermFrequencyResponse {
                total: conc.total,
                corpus_size: conc.corpus_size,
                ipm: conc.ipm(),
            }));
        }
    }

    let reply = state.dispatcher.submit_and_wait(op.clone()).await?;
    let conc = reply.result.clone().into_conc_size()?;
    if let Some(cache) = &state.cache {
        cache.put(&op, &reply.result)?;
    }
    Ok(Json(TermFrequencyResponse {
        total: conc.total,
        corpus_size: conc.corpus_size,
        ipm: conc.ipm(),
    }))
}

/// GET /api/v1/corpora/:corpus_id/collocations
pub async fn collocations(
    State(state): State<AppState>,
    Path(corpus_id): Path<String>,
    Query(params): Query<CollocationsParams>,
) -> Result<Json<CollocationsResponse>, ApiError> {
    if params.w.trim().is_empty() {
        return Err(Error::InvalidInput("empty pivot word".to_string()).into());
    }
    let corpus_path = state.corpus_path(&corpus_id)?;
    let pivot = Word {
        value: params.w.clone(),
        pos: params.pos,
    };

    // preliminary distribution of the pivot's relation, grouped by the
    // governing lemma
    let args = FreqDistribArgs {
        corpus_path: corpus_path.clone(),
        partition_path: None,
        query: state.qgen.fx_query(&pivot),
        crit: format!("{} 0", state.sketch.parent_lemma_attr),
        freq_limit: 1,
        max_items: 0,
        is_text_types: false,
    };
    let parts = state.partitions.list(&corpus_id)?;
    let prelim = fanout::run_over_partitions(state.dispatcher.clone(), args, &parts, None).await?;

    let colls = state.reorder.reorder(&corpus_path, &pivot, prelim).await?;
    info!(corpus = %corpus_id, pivot = %params.w, colls = colls.len(), "collocations computed");
    Ok(Json(CollocationsResponse {
        corpus: corpus_id,
        pivot: params.w,
        colls,
    }))
}
