use super::batch::Batch;

/// A scan with N endpoints carries indices `0..N-1` and a sentinel at `N`,
/// so it is finished once the sentinel is in and the endpoint count has
/// caught up with the highest index.
pub fn is_complete(batch: &Batch) -> bool {
    batch.saw_sentinel && batch.endpoint_count() == batch.max_index_seen as usize
}
