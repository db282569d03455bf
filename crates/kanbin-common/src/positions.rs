//! Gap-based ordering keys for tasks within a column.
//!
//! New keys are placed halfway between their neighbours so a reorder writes a
//! single task. Once adjacent keys get closer than [`MIN_GAP`] the column is
//! renumbered in one pass with [`rebalance`].

use uuid::Uuid;

use crate::models::Task;

/// Spacing between keys after a rebalance, and the key of the first task in an empty column.
pub const GAP: i64 = 1000;

/// Adjacent keys closer than this trigger a rebalance.
pub const MIN_GAP: i64 = 10;

/// Key for a task inserted between `before` and `after`.
///
/// Strictly between the two when `after - before >= 2`. When no integer fits,
/// the result equals one of the neighbours and the column needs a rebalance.
pub fn between(before: Option<i64>, after: Option<i64>) -> i64 {
    match (before, after) {
        (None, None) => GAP,
        (None, Some(after)) => after.div_euclid(2),
        (Some(before), None) => before.saturating_add(GAP),
        (Some(before), Some(after)) => {
            // i128 keeps the midpoint exact near the i64 bounds
            ((before as i128 + after as i128).div_euclid(2)) as i64
        }
    }
}

/// True iff two tasks adjacent in position order are fewer than [`MIN_GAP`] apart.
pub fn needs_rebalance(column: &[Task]) -> bool {
    if column.len() < 2 {
        return false;
    }
    let mut positions: Vec<i64> = column.iter().map(|t| t.position).collect();
    positions.sort_unstable();
    positions
        .windows(2)
        .any(|pair| pair[1].saturating_sub(pair[0]) < MIN_GAP)
}

/// Renumber a column to `GAP, 2*GAP, ...` keeping the current order.
///
/// Ties keep their order in `column`.
pub fn rebalance(column: &[Task]) -> Vec<Task> {
    let mut sorted = column.to_vec();
    sorted.sort_by_key(|t| t.position);
    for (index, task) in sorted.iter_mut().enumerate() {
        task.position = (index as i64 + 1) * GAP;
    }
    sorted
}

/// Ids and new keys of the tasks whose position differs between two versions of a column.
pub fn changed_positions(before: &[Task], after: &[Task]) -> Vec<(Uuid, i64)> {
    after
        .iter()
        .filter(|new| {
            before
                .iter()
                .find(|old| old.id == new.id)
                .is_none_or(|old| old.position != new.position)
        })
        .map(|t| (t.id, t.position))
        .collect()
}
