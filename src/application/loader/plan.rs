//! Slot planning: which pool feeds which position of the window.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;
use crate::domain::types::{PostId, TypeSelector};

/// Resolved identifier sequence for the window starting at `offset`, plus
/// the absolute indices that could not be filled.
///
/// This is the unit stored by plan caches; it never carries content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPlan {
    offset: usize,
    ordered_ids: Vec<PostId>,
    not_found: Vec<usize>,
}

impl FeedPlan {
    pub fn new(offset: usize, ordered_ids: Vec<PostId>, mut not_found: Vec<usize>) -> Self {
        not_found.sort_unstable();
        not_found.dedup();
        Self {
            offset,
            ordered_ids,
            not_found,
        }
    }

    pub fn empty(offset: usize) -> Self {
        Self {
            offset,
            ..Self::default()
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn ordered_ids(&self) -> &[PostId] {
        &self.ordered_ids
    }

    /// Absolute indices (not window positions), ascending.
    pub fn not_found(&self) -> &[usize] {
        &self.not_found
    }

    pub fn is_not_found(&self, index: usize) -> bool {
        self.not_found.binary_search(&index).is_ok()
    }

    pub fn slot_count(&self) -> usize {
        self.ordered_ids.len() + self.not_found.len()
    }

    /// Confirm the plan covers exactly `[offset, offset + limit)`.
    pub fn check_window(&self, offset: usize, limit: usize) -> Result<(), DomainError> {
        if self.offset != offset {
            return Err(DomainError::PlanWindow(format!(
                "plan starts at {} but the window starts at {offset}",
                self.offset
            )));
        }
        if self.slot_count() != limit {
            return Err(DomainError::PlanWindow(format!(
                "plan covers {} slots but the window holds {limit}",
                self.slot_count()
            )));
        }

        let end = offset
            .checked_add(limit)
            .ok_or(DomainError::WindowOverflow { offset, limit })?;
        if let Some(index) = self
            .not_found
            .iter()
            .find(|index| **index < offset || **index >= end)
        {
            return Err(DomainError::PlanWindow(format!(
                "not-found index {index} lies outside [{offset}, {end})"
            )));
        }

        Ok(())
    }
}

/// Role of one position inside the requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotRole {
    StickyPost(PostId),
    /// Pinned to an id that failed validation; never refilled from a pool.
    Rejected,
    /// Index into [`SlotLayout::type_pools`].
    StickyType(usize),
    Default,
}

/// How many ids a pool must skip (slots before the window) and supply
/// (slots inside it).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PoolDemand {
    pub(crate) offset: usize,
    pub(crate) count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TypePool {
    pub(crate) selector: TypeSelector,
    pub(crate) demand: PoolDemand,
}

#[derive(Debug)]
pub(crate) struct SlotLayout {
    roles: Vec<SlotRole>,
    type_pools: Vec<TypePool>,
    default_demand: PoolDemand,
}

impl SlotLayout {
    /// Classify every index in `offset..offset + limit`. Sticky posts win
    /// over sticky types, which win over the default pool.
    ///
    /// Pool offsets come from the pinned indices before the window alone,
    /// so the cost does not grow with `offset`.
    pub(crate) fn build(
        offset: usize,
        limit: usize,
        sticky_posts: &BTreeMap<usize, PostId>,
        rejected: &BTreeSet<usize>,
        sticky_types: &BTreeMap<usize, TypeSelector>,
    ) -> Result<Self, DomainError> {
        let end = offset
            .checked_add(limit)
            .ok_or(DomainError::WindowOverflow { offset, limit })?;
        let pinned = |index: &usize| sticky_posts.contains_key(index) || rejected.contains(index);

        let pinned_before = sticky_posts.range(..offset).count()
            + rejected
                .range(..offset)
                .filter(|index| !sticky_posts.contains_key(index))
                .count();

        let mut type_offsets: HashMap<&TypeSelector, usize> = HashMap::new();
        let mut typed_before = 0usize;
        for (index, selector) in sticky_types.range(..offset) {
            if pinned(index) {
                continue;
            }
            *type_offsets.entry(selector).or_default() += 1;
            typed_before += 1;
        }

        let mut default_demand = PoolDemand {
            offset: offset - pinned_before - typed_before,
            count: 0,
        };

        let mut roles = Vec::with_capacity(limit);
        let mut type_pools: Vec<TypePool> = Vec::new();

        for index in offset..end {
            if let Some(id) = sticky_posts.get(&index) {
                roles.push(SlotRole::StickyPost(*id));
                continue;
            }
            if rejected.contains(&index) {
                roles.push(SlotRole::Rejected);
                continue;
            }

            match sticky_types.get(&index) {
                Some(selector) => {
                    let position = match type_pools
                        .iter()
                        .position(|pool| &pool.selector == selector)
                    {
                        Some(position) => position,
                        None => {
                            type_pools.push(TypePool {
                                selector: selector.clone(),
                                demand: PoolDemand {
                                    offset: type_offsets.get(selector).copied().unwrap_or(0),
                                    count: 0,
                                },
                            });
                            type_pools.len() - 1
                        }
                    };
                    type_pools[position].demand.count += 1;
                    roles.push(SlotRole::StickyType(position));
                }
                None => {
                    default_demand.count += 1;
                    roles.push(SlotRole::Default);
                }
            }
        }

        Ok(Self {
            roles,
            type_pools,
            default_demand,
        })
    }

    pub(crate) fn roles(&self) -> &[SlotRole] {
        &self.roles
    }

    pub(crate) fn type_pools(&self) -> &[TypePool] {
        &self.type_pools
    }

    pub(crate) fn default_demand(&self) -> PoolDemand {
        self.default_demand
    }
}
