//! Longest Increasing Subsequence
//!
//! Patience sorting over the non-sentinel entries of an old-index array:
//! O(n log n) via binary search into a tails table, with a predecessor
//! chain for reconstruction.

/// Positions (into `values`) of one longest strictly increasing subsequence
/// of the `Some` entries. Returned ascending.
pub(crate) fn longest_increasing_positions(values: &[Option<usize>]) -> Vec<usize> {
    // tails[k] = (value, position) of the smallest tail among increasing
    // subsequences of length k + 1
    let mut tails: Vec<(usize, usize)> = Vec::new();
    let mut preds: Vec<Option<usize>> = vec![None; values.len()];

    for (position, slot) in values.iter().enumerate() {
        let Some(value) = *slot else {
            continue;
        };

        let rank = tails.partition_point(|&(tail_value, _)| tail_value < value);
        preds[position] = rank.checked_sub(1).map(|below| tails[below].1);

        if rank == tails.len() {
            tails.push((value, position));
        } else {
            tails[rank] = (value, position);
        }
    }

    let Some(&(_, last)) = tails.last() else {
        return Vec::new();
    };

    let mut positions = Vec::with_capacity(tails.len());
    let mut cursor = Some(last);
    while let Some(position) = cursor {
        positions.push(position);
        cursor = preds[position];
    }
    positions.reverse();
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(values: &[usize]) -> Vec<Option<usize>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn empty_input_has_empty_subsequence() {
        assert!(longest_increasing_positions(&[]).is_empty());
        assert!(longest_increasing_positions(&[None, None]).is_empty());
    }

    #[test]
    fn already_increasing_keeps_everything() {
        let positions = longest_increasing_positions(&wrap(&[0, 1, 2, 3]));
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn strictly_decreasing_keeps_one() {
        let positions = longest_increasing_positions(&wrap(&[3, 2, 1, 0]));
        assert_eq!(positions.len(), 1);
    }

    #[test]
    fn single_inversion_drops_one() {
        // [0, 2, 1, 3, 4]: best is length 4
        let input = [0, 2, 1, 3, 4];
        let positions = longest_increasing_positions(&wrap(&input));
        assert_eq!(positions.len(), 4);

        // Whatever was chosen must actually be increasing
        let values: Vec<usize> = positions.iter().map(|&p| input[p]).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sentinels_are_skipped_but_positions_are_preserved() {
        let values = vec![Some(5), None, Some(1), None, Some(2), Some(9)];
        let positions = longest_increasing_positions(&values);
        // 1 < 2 < 9 at positions 2, 4, 5
        assert_eq!(positions, vec![2, 4, 5]);
    }

    #[test]
    fn classic_patience_case() {
        let positions = longest_increasing_positions(&wrap(&[10, 9, 2, 5, 3, 7, 101, 18]));
        assert_eq!(positions.len(), 4); // e.g. 2, 3, 7, 18

        let subsequence: Vec<usize> = positions
            .iter()
            .map(|&p| [10, 9, 2, 5, 3, 7, 101, 18][p])
            .collect();
        assert!(subsequence.windows(2).all(|w| w[0] < w[1]));
    }
}
