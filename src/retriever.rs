use std::{collections::BTreeMap, sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    filters::Filters,
    item::{Candidate, ItemKind},
    store::VectorStore,
};

/// Default number of first-stage candidates per collection.
pub const DEFAULT_CANDIDATE_K: usize = 100;

/// What one collection contributed to the first stage.
#[derive(Debug)]
pub enum CollectionOutcome {
    Candidates(Vec<Candidate>),
    Failed(Error),
    TimedOut,
}

/// Stage-1 retrieval over representative vectors.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Search one collection synchronously and convert hits to candidates.
    ///
    /// Filters go to the store as-is; nothing is filtered after the fact.
    pub fn retrieve_collection(
        &self,
        collection: ItemKind,
        query_repr: &[f32],
        k: usize,
        filters: &Filters,
    ) -> Result<Vec<Candidate>> {
        let hits = self
            .store
            .search(collection, query_repr, k, filters)
            .map_err(|e| match e {
                Error::Retrieval(_) => e,
                other => Error::Retrieval(format!("{collection}: {other}")),
            })?;

        Ok(hits
            .into_iter()
            .map(|hit| {
                Candidate::new(
                    hit.id,
                    hit.doc_id,
                    collection,
                    hit.score,
                    hit.metadata,
                )
            })
            .collect())
    }

    /// Search every requested collection concurrently, each on the blocking
    /// pool and each bounded by `budget`.
    ///
    /// A failure or timeout in one collection never affects the others. The
    /// returned map is keyed by collection, so its order does not depend on
    /// which search finished first.
    pub async fn retrieve(
        &self,
        query_repr: Arc<[f32]>,
        collections: &[ItemKind],
        k: usize,
        filters: &Filters,
        budget: Duration,
    ) -> BTreeMap<ItemKind, CollectionOutcome> {
        let mut tasks = JoinSet::new();

        for &collection in collections {
            let retriever = self.clone();
            let query_repr = Arc::clone(&query_repr);
            let filters = filters.clone();

            tasks.spawn(async move {
                let search = tokio::task::spawn_blocking(move || {
                    retriever.retrieve_collection(
                        collection,
                        &query_repr,
                        k,
                        &filters,
                    )
                });

                let outcome = match tokio::time::timeout(budget, search).await {
                    Ok(Ok(Ok(candidates))) => {
                        CollectionOutcome::Candidates(candidates)
                    }
                    Ok(Ok(Err(e))) => CollectionOutcome::Failed(e),
                    Ok(Err(join)) => CollectionOutcome::Failed(
                        Error::Retrieval(format!(
                            "{collection}: search task failed: {join}"
                        )),
                    ),
                    Err(_) => CollectionOutcome::TimedOut,
                };
                (collection, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((collection, outcome)) => {
                    match &outcome {
                        CollectionOutcome::Candidates(c) => {
                            debug!(%collection, candidates = c.len(), "stage 1 done");
                        }
                        CollectionOutcome::Failed(e) => {
                            warn!(%collection, "stage 1 failed: {e}");
                        }
                        CollectionOutcome::TimedOut => {
                            warn!(%collection, ?budget, "stage 1 timed out");
                        }
                    }
                    outcomes.insert(collection, outcome);
                }
                Err(e) => warn!("stage 1 task panicked: {e}"),
            }
        }

        // A panicked wrapper task leaves its collection unreported.
        for &collection in collections {
            outcomes.entry(collection).or_insert_with(|| {
                CollectionOutcome::Failed(Error::Retrieval(format!(
                    "{collection}: search task aborted"
                )))
            });
        }

        outcomes
    }
}
