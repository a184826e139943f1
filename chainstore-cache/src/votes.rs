//! Vote id resolution.

use crate::index::IndexEntry;
use crate::store::ChainStore;
use chainstore_core::{DatabaseApi, Lookup, ObjectId, Snapshot, StoreResult, VoteId};
use tracing::warn;

impl<D: DatabaseApi> ChainStore<D> {
    /// Resolve each vote id to the witness, committee member or worker it
    /// votes for, in request order. Vote ids the cache knows nothing about
    /// are looked up together in one remote call.
    pub fn get_objects_by_vote_ids(&self, votes: &[VoteId]) -> Vec<Lookup<Snapshot>> {
        let mut unresolved: Vec<ObjectId> = Vec::new();
        let mut missing: Vec<VoteId> = Vec::new();
        let (results, epoch) = {
            let mut state = self.lock();
            let mut results = Vec::with_capacity(votes.len());
            for vote in votes {
                let found = match state.indices.objects_by_vote_id.get(vote) {
                    Some(IndexEntry::Found(id)) => Some(*id),
                    Some(IndexEntry::Absent) => {
                        results.push(Lookup::Missing);
                        continue;
                    }
                    Some(IndexEntry::Pending) => {
                        results.push(Lookup::Loading);
                        continue;
                    }
                    None => None,
                };
                match found {
                    Some(id) => {
                        let lookup = state.objects.lookup(&id);
                        if state.objects.get(&id).is_none() {
                            unresolved.push(id);
                        }
                        results.push(lookup);
                    }
                    None => {
                        state.indices.objects_by_vote_id.mark_pending(*vote);
                        missing.push(*vote);
                        results.push(Lookup::Loading);
                    }
                }
            }
            (results, state.epoch)
        };

        for id in unresolved {
            self.get_object_by_id(id, false);
        }
        if !missing.is_empty() {
            let store = self.clone();
            self.spawn(async move {
                let reply = store.inner.api.lookup_vote_ids(&missing).await;
                store.ingest_at(epoch, |ing| match reply {
                    Ok(values) => {
                        let mut values = values.into_iter();
                        for vote in &missing {
                            let index_entry = match values.next().flatten() {
                                Some(value) => match ing.object(&value) {
                                    Ok(snapshot) => snapshot.as_ref().and_then(Snapshot::id),
                                    Err(e) => {
                                        warn!(vote = %vote, error = %e, "Ignoring malformed vote object");
                                        ing.state.indices.objects_by_vote_id.revert_pending(vote);
                                        continue;
                                    }
                                },
                                None => None,
                            };
                            let index = &mut ing.state.indices.objects_by_vote_id;
                            match index_entry {
                                Some(id) => index.set_found(*vote, id),
                                None => index.set_absent(*vote),
                            }
                            ing.fx.changed = true;
                        }
                    }
                    Err(e) => {
                        warn!(votes = missing.len(), error = %e, "lookup_vote_ids failed");
                        for vote in &missing {
                            ing.state.indices.objects_by_vote_id.revert_pending(vote);
                        }
                    }
                });
            });
        }
        results
    }

    /// Resolve a single vote id given as `"type:instance"`.
    pub fn get_object_by_vote_id(&self, vote: &str) -> StoreResult<Lookup<Snapshot>> {
        let vote: VoteId = vote.parse()?;
        Ok(self
            .get_objects_by_vote_ids(std::slice::from_ref(&vote))
            .into_iter()
            .next()
            .unwrap_or(Lookup::Loading))
    }
}
