//! Distributed search.
//!
//! A query goes to every reachable indexer at once. Answers are merged by
//! content hash (one result per file, providers unioned), filtered, ranked and
//! truncated. Ranking is total so the same answers always produce the same
//! list, whatever order the indexers replied in.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::cancel::CancelToken;
use crate::error::{OverlayError, Result};
use crate::model::{ext_of, normalize_ext, QueryFilters, SearchResult};
use crate::session::Session;
use crate::wire::{Request, Response};

pub const DEFAULT_SEARCH_LIMIT: usize = 25;

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub filters: Option<QueryFilters>,
    /// `None` or `Some(0)` means [`DEFAULT_SEARCH_LIMIT`].
    pub limit: Option<usize>,
}

impl SearchOptions {
    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = if filters.is_empty() { None } else { Some(filters) };
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn effective_limit(&self) -> usize {
        match self.limit {
            Some(n) if n > 0 => n,
            _ => DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Parse a user-supplied limit. Anything that is not a positive integer
/// falls back to the default rather than to zero.
pub fn parse_limit(raw: &str) -> usize {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => n as usize,
        _ => DEFAULT_SEARCH_LIMIT,
    }
}

/// Merge indexer answers, in indexer order, into one result per content hash.
///
/// Provider lists are unioned by public key keeping first-seen order, and the
/// merged score is the best score any indexer gave. Results left without a
/// provider are dropped.
pub fn merge_results<I>(batches: I) -> Vec<SearchResult>
where
    I: IntoIterator<Item = Vec<SearchResult>>,
{
    let mut merged: Vec<SearchResult> = Vec::new();
    let mut by_hash: HashMap<String, usize> = HashMap::new();
    let mut seen_providers: Vec<HashSet<String>> = Vec::new();

    for batch in batches {
        for mut hit in batch {
            if !hit.score.is_finite() || hit.score < 0.0 {
                hit.score = 0.0;
            }
            hit.ext = if hit.ext.trim().is_empty() {
                ext_of(&hit.filename)
            } else {
                normalize_ext(&hit.ext)
            };

            let slot = match by_hash.get(&hit.content_hash) {
                Some(&i) => i,
                None => {
                    let i = merged.len();
                    by_hash.insert(hit.content_hash.clone(), i);
                    seen_providers.push(HashSet::new());
                    merged.push(SearchResult {
                        providers: Vec::new(),
                        ..hit.clone()
                    });
                    i
                }
            };

            let entry = &mut merged[slot];
            if hit.score > entry.score {
                entry.score = hit.score;
            }
            for provider in hit.providers {
                if provider.pub_key.is_empty() {
                    continue;
                }
                if seen_providers[slot].insert(provider.pub_key.clone()) {
                    entry.providers.push(provider);
                }
            }
        }
    }

    merged.retain(|r| !r.providers.is_empty());
    merged
}

/// Score descending, then provider count descending, then filename ascending.
/// Content hash breaks any remaining tie.
pub fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.providers.len().cmp(&a.providers.len()))
        .then_with(|| a.filename.cmp(&b.filename))
        .then_with(|| a.content_hash.cmp(&b.content_hash))
}

/// Merge, filter, rank and truncate.
pub fn combine<I>(batches: I, filters: Option<&QueryFilters>, limit: usize) -> Vec<SearchResult>
where
    I: IntoIterator<Item = Vec<SearchResult>>,
{
    let mut results = merge_results(batches);
    if let Some(filters) = filters {
        results.retain(|r| filters.matches(r));
    }
    results.sort_by(rank_order);
    results.truncate(limit);
    results
}

/// Broadcast `query` to every reachable indexer.
///
/// Firing `cancel` abandons the outstanding calls and yields
/// `SearchCancelled`. Indexers that fail or time out are skipped; if none
/// answered the search fails with `NetworkUnreachable`.
pub async fn search(
    session: &Session,
    query: &str,
    opts: &SearchOptions,
    cancel: &CancelToken,
) -> Result<Vec<SearchResult>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(OverlayError::InvalidQuery("query must not be empty".into()));
    }
    if cancel.is_cancelled() {
        return Err(OverlayError::SearchCancelled);
    }

    let limit = opts.effective_limit();
    let filters = opts.filters.clone().unwrap_or_default();

    let broadcast = async {
        let indexers = session.indexers().await;
        if indexers.is_empty() {
            return Err(OverlayError::NetworkUnreachable("no indexer reachable".into()));
        }
        tracing::debug!("Searching {:?} on {} indexer(s)", query, indexers.len());

        let request = Request::Search {
            query: query.to_string(),
            filters: filters.clone(),
            limit: limit.min(u32::MAX as usize) as u32,
        };
        let answers = session
            .fan_out(&indexers, session.query_timeout(), |ep| {
                let request = &request;
                async move {
                    match session.request(&ep, request).await? {
                        Response::Results(hits) => Ok(hits),
                        other => Err(other.unexpected("Results")),
                    }
                }
            })
            .await;

        let mut batches = Vec::with_capacity(answers.len());
        for (indexer, res) in answers {
            match res {
                Ok(hits) => {
                    tracing::trace!("{} returned {} hit(s)", indexer, hits.len());
                    batches.push(hits);
                }
                Err(e) => tracing::warn!("Indexer {} failed: {}", indexer, e),
            }
        }
        if batches.is_empty() {
            return Err(OverlayError::NetworkUnreachable(format!(
                "none of {} indexer(s) answered",
                indexers.len()
            )));
        }
        Ok(batches)
    };

    let batches = cancel
        .run(broadcast)
        .await
        .ok_or(OverlayError::SearchCancelled)??;

    let filters = opts.filters.as_ref().filter(|f| !f.is_empty());
    Ok(combine(batches, filters, limit))
}
