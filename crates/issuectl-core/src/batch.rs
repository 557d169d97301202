//! Fixed-size batching shared by ingestion, detection and planning so a
//! large repository scan never holds thousands of issues in flight at
//! once against the GitHub rate budget.

/// Split `items` into chunks of at most `batch_size`. A `batch_size` of
/// zero is treated as one batch containing everything, matching the
/// teacher's own defensive reading of a zero-sized chunk request.
pub fn batch_items<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    if batch_size == 0 {
        return vec![items];
    }
    let mut batches = Vec::with_capacity(items.len() / batch_size + 1);
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_even_batches() {
        let items: Vec<i32> = (0..20).collect();
        let batches = batch_items(items, 10);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batches[1].len(), 10);
    }

    #[test]
    fn trailing_partial_batch_is_kept() {
        let items: Vec<i32> = (0..25).collect();
        let batches = batch_items(items, 10);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2].len(), 5);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let items: Vec<i32> = vec![];
        assert!(batch_items(items, 10).is_empty());
    }

    #[test]
    fn zero_batch_size_yields_single_batch() {
        let items = vec![1, 2, 3];
        let batches = batch_items(items, 0);
        assert_eq!(batches, vec![vec![1, 2, 3]]);
    }
}
