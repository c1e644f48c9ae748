//! Order-preserving batch partitioning.
//!
//! Both pipeline stages call an external backend with groups of articles.
//! The filter stage caps batches by count; the summarization stage caps them
//! by count and by an aggregate text budget.

/// Partition `items` into consecutive batches of at most `max_items`.
///
/// A `max_items` of zero is treated as one.
pub fn batch_by_count<T>(items: Vec<T>, max_items: usize) -> Vec<Vec<T>> {
    batch_by_budget(items, max_items, usize::MAX, |_| 0)
}

/// Partition `items` into consecutive batches bounded by count and by the
/// summed `weight` of their items.
///
/// Concatenating the batches yields the input order exactly. An item whose
/// weight alone exceeds `max_weight` is placed in a batch by itself rather
/// than dropped.
pub fn batch_by_budget<T, F>(
    items: Vec<T>,
    max_items: usize,
    max_weight: usize,
    weight: F,
) -> Vec<Vec<T>>
where
    F: Fn(&T) -> usize,
{
    let max_items = max_items.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<T> = Vec::new();
    let mut current_weight = 0usize;

    for item in items {
        let w = weight(&item);
        let full = current.len() >= max_items || current_weight.saturating_add(w) > max_weight;
        if !current.is_empty() && full {
            batches.push(std::mem::take(&mut current));
            current_weight = 0;
        }
        current_weight = current_weight.saturating_add(w);
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_batches_preserve_order() {
        let batches = batch_by_count((0..7).collect(), 3);
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let batches: Vec<Vec<u8>> = batch_by_count(Vec::new(), 5);
        assert!(batches.is_empty());
    }

    #[test]
    fn zero_cap_is_one() {
        let batches = batch_by_count(vec!['a', 'b'], 0);
        assert_eq!(batches, vec![vec!['a'], vec!['b']]);
    }

    #[test]
    fn budget_splits_on_weight() {
        let items = vec!["aaaa", "bb", "cccc", "d"];
        let batches = batch_by_budget(items, 10, 6, |s| s.len());
        assert_eq!(batches, vec![vec!["aaaa", "bb"], vec!["cccc", "d"]]);
    }

    #[test]
    fn oversized_item_gets_its_own_batch() {
        let items = vec!["a", "xxxxxxxxxxxx", "b", "c"];
        let batches = batch_by_budget(items, 10, 4, |s| s.len());
        assert_eq!(batches, vec![vec!["a"], vec!["xxxxxxxxxxxx"], vec!["b", "c"]]);
    }

    #[test]
    fn count_cap_applies_under_budget() {
        let batches = batch_by_budget(vec![1, 1, 1, 1, 1], 2, 100, |n| *n);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches.concat(), vec![1, 1, 1, 1, 1]);
    }
}
