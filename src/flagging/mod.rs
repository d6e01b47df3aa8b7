//! Ranking and flagging of association alternatives per primary source
//!
//! All candidate rows sharing one primary identifier form a group; the
//! group is a set of mutually exclusive explanations of that source. The
//! best posterior gets flag 1, close runners-up flag 2, and logsumexp over
//! the group's total evidence yields the normalised per-row and no-match
//! probabilities.

use std::collections::BTreeMap;

use crate::bayes::{logsumexp10, posterior};
use crate::table::Column;

/// Derived per-group output columns
pub struct GroupColumns {
    /// 1 for the best association of a group, 2 for acceptable secondary
    /// solutions, 0 otherwise
    pub match_flag: Vec<i64>,
    /// Probability that the primary source has no counterpart at all
    pub no_match: Vec<f64>,
    /// Probability that this row is the right association within its group
    pub this_match: Vec<f64>,
}

/// Group row indices by the values of the primary identifier column.
/// Groups come back in ascending identifier order, rows in table order.
pub fn group_by_column(column: &Column) -> Vec<Vec<usize>> {
    match column {
        Column::Int(values) => {
            let mut map: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
            for (row, &id) in values.iter().enumerate() {
                map.entry(id).or_default().push(row);
            }
            map.into_values().collect()
        }
        Column::Text(values) => {
            let mut map: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for (row, id) in values.iter().enumerate() {
                map.entry(id).or_default().push(row);
            }
            map.into_values().collect()
        }
        Column::Float(values) => {
            let mut order: Vec<usize> = (0..values.len()).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]).then(a.cmp(&b)));
            let mut groups: Vec<Vec<usize>> = Vec::new();
            for row in order {
                let same_id = groups
                    .last()
                    .map_or(false, |g| values[g[0]].total_cmp(&values[row]).is_eq());
                if same_id {
                    if let Some(group) = groups.last_mut() {
                        group.push(row);
                    }
                } else {
                    groups.push(vec![row]);
                }
            }
            groups
        }
    }
}

/// Flag and normalise each group.
///
/// Flag 2 marks rows within `diff_secondary` of the group's best posterior
/// (ignoring posteriors below 0.1); flag 1 marks the best rows and is
/// written last, so it wins where both conditions hold. The group evidence
/// sum runs in row order, keeping the reduction reproducible.
pub fn flag_groups(
    groups: &[Vec<usize>],
    post: &[f64],
    total: &[f64],
    prior: &[f64],
    diff_secondary: f64,
) -> GroupColumns {
    let n = post.len();
    let mut match_flag = vec![0i64; n];
    let mut no_match = vec![0.0f64; n];
    let mut this_match = vec![0.0f64; n];

    for group in groups {
        let best = group
            .iter()
            .map(|&r| post[r])
            .fold(f64::NEG_INFINITY, f64::max);

        for &row in group {
            if best - post[row] < diff_secondary && post[row] > 0.1 {
                match_flag[row] = 2;
            }
        }
        for &row in group {
            if post[row] == best {
                match_flag[row] = 1;
            }
        }

        let totals: Vec<f64> = group.iter().map(|&r| total[r]).collect();
        let bfsum = logsumexp10(&totals);
        for &row in group {
            no_match[row] = 1.0 - posterior(prior[row], bfsum);
            this_match[row] = 10f64.powf(total[row] - bfsum);
        }
    }

    GroupColumns {
        match_flag,
        no_match,
        this_match,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_group_by_int_column_sorted() {
        let column = Column::Int(vec![7, 3, 7, 5, 3]);
        let groups = group_by_column(&column);
        assert_eq!(groups, vec![vec![1, 4], vec![3], vec![0, 2]]);
    }

    #[test]
    fn test_group_by_text_and_float() {
        let column = Column::Text(vec!["b".into(), "a".into(), "b".into()]);
        assert_eq!(group_by_column(&column), vec![vec![1], vec![0, 2]]);

        let column = Column::Float(vec![2.5, 1.5, 2.5]);
        assert_eq!(group_by_column(&column), vec![vec![1], vec![0, 2]]);
    }

    #[test]
    fn test_secondary_flag_threshold() {
        // two alternatives with posteriors 0.90 and 0.88
        let groups = vec![vec![0, 1]];
        let post = [0.90, 0.88];
        let total = [1.0, 0.9];
        let prior = [0.3, 0.3];

        // a generous threshold flags the runner-up as acceptable
        let flags = flag_groups(&groups, &post, &total, &prior, 0.05);
        assert_eq!(flags.match_flag, vec![1, 2]);

        // a tight threshold leaves it unflagged
        let flags = flag_groups(&groups, &post, &total, &prior, 0.01);
        assert_eq!(flags.match_flag, vec![1, 0]);
    }

    #[test]
    fn test_poor_solutions_never_get_flag_two() {
        let groups = vec![vec![0, 1]];
        let post = [0.09, 0.08];
        let total = [-1.0, -1.1];
        let prior = [0.01, 0.01];

        let flags = flag_groups(&groups, &post, &total, &prior, 0.05);
        // the best row keeps flag 1 even when poor; the runner-up is below
        // the 0.1 floor for flag 2
        assert_eq!(flags.match_flag, vec![1, 0]);
    }

    #[test]
    fn test_best_row_wins_over_secondary_condition() {
        // the best row trivially satisfies the flag-2 condition too;
        // flag 1 is written last and must win
        let groups = vec![vec![0]];
        let flags = flag_groups(&groups, &[0.95], &[2.0], &[0.4], 0.05);
        assert_eq!(flags.match_flag, vec![1]);
    }

    #[test]
    fn test_group_normalisation() {
        let groups = vec![vec![0, 1, 2]];
        let post = [0.9, 0.5, 0.2];
        let total = [2.0, 1.3, 0.4];
        let prior = [0.2, 0.2, 0.2];

        let flags = flag_groups(&groups, &post, &total, &prior, 0.005);
        let sum: f64 = flags.this_match.iter().sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);

        // no-match probability is shared by the whole group
        assert_relative_eq!(flags.no_match[0], flags.no_match[1], epsilon = 1e-12);
        let bfsum = logsumexp10(&total);
        assert_relative_eq!(
            flags.no_match[0],
            1.0 - posterior(0.2, bfsum),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_at_most_one_flagged_best_with_distinct_posteriors() {
        let groups = vec![vec![0, 1], vec![2, 3, 4]];
        let post = [0.9, 0.3, 0.7, 0.69, 0.1];
        let total = [1.0, 0.2, 0.8, 0.78, -0.5];
        let prior = [0.1; 5];

        let flags = flag_groups(&groups, &post, &total, &prior, 0.005);
        for group in &groups {
            let best_count = group
                .iter()
                .filter(|&&r| flags.match_flag[r] == 1)
                .count();
            assert_eq!(best_count, 1);
        }
    }
}
