use crate::aggregate::Centroid;
use crate::error::{GroupSide, MatchError};
use serde::Serialize;

/// Decides from a group label whether a centroid belongs to the Left group.
pub trait GroupPredicate {
    fn is_left(&self, label: &str) -> bool;
}

impl<F> GroupPredicate for F
where
    F: Fn(&str) -> bool,
{
    fn is_left(&self, label: &str) -> bool {
        self(label)
    }
}

/// Left is every centroid whose label equals the sentinel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelEquals(pub String);

impl GroupPredicate for LabelEquals {
    fn is_left(&self, label: &str) -> bool {
        label == self.0
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GroupPair {
    pub left: Vec<Centroid>,
    pub right: Vec<Centroid>,
}

/// Splits centroids into (Left, Right), keeping input order within each side.
pub fn partition_centroids<P: GroupPredicate + ?Sized>(
    centroids: &[Centroid],
    predicate: &P,
) -> Result<GroupPair, MatchError> {
    let (left, right): (Vec<Centroid>, Vec<Centroid>) = centroids
        .iter()
        .cloned()
        .partition(|centroid| predicate.is_left(&centroid.label));

    let empty_side = if left.is_empty() {
        Some(GroupSide::Left)
    } else if right.is_empty() {
        Some(GroupSide::Right)
    } else {
        None
    };
    if let Some(side) = empty_side {
        return Err(MatchError::InsufficientData {
            side,
            left_n: left.len(),
            right_n: right.len(),
        });
    }

    Ok(GroupPair { left, right })
}
