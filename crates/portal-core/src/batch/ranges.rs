//! Contiguous range planning.
//!
//! Pure functions only: the coalescer resolves every item to an absolute block number first,
//! then asks [`plan_ranges`] for the minimal set of stream requests.

use crate::types::BlockRange;

/// Finality tier a block is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Latest,
    Finalized,
}

impl Tier {
    #[must_use]
    pub fn is_finalized(self) -> bool {
        self == Self::Finalized
    }
}

/// One resolved batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedItem {
    /// Position of the item in the batch.
    pub index: usize,
    pub number: u64,
    pub tier: Tier,
    pub full_transactions: bool,
}

/// One stream request and the batch items it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeGroup {
    pub tier: Tier,
    pub range: BlockRange,
    /// Set when any member needs full transactions; hash-only members read a subset.
    pub full_transactions: bool,
    /// Batch indices of the members, in block order.
    pub members: Vec<usize>,
}

/// Groups items into maximal runs of consecutive block numbers per tier.
///
/// Duplicate numbers share a run; a gap of more than one block starts a new run. Groups are
/// ordered by tier, then by first block.
#[must_use]
pub fn plan_ranges(items: &[PlannedItem]) -> Vec<RangeGroup> {
    let mut sorted: Vec<&PlannedItem> = items.iter().collect();
    sorted.sort_by_key(|item| (item.tier, item.number, item.index));

    let mut groups: Vec<RangeGroup> = Vec::new();
    for item in sorted {
        match groups.last_mut() {
            Some(group)
                if group.tier == item.tier && item.number <= group.range.to.saturating_add(1) =>
            {
                group.range.to = group.range.to.max(item.number);
                group.full_transactions |= item.full_transactions;
                group.members.push(item.index);
            }
            _ => groups.push(RangeGroup {
                tier: item.tier,
                range: BlockRange::new(item.number, item.number),
                full_transactions: item.full_transactions,
                members: vec![item.index],
            }),
        }
    }
    groups
}
