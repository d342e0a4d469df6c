/// Bitonic sort planning over a variable number of live particles
///
/// The alive list is sorted in three kinds of passes:
///
/// - **initial**: every 512-element block is sorted on its own
///   (one indirect dispatch, group count computed on the GPU from the live count)
/// - **incremental step**: one global merge step over pairs of presorted blocks
/// - **inner**: the last nine merge steps, done inside 512-element blocks
///
/// Only pairs whose far element is below the live count are compared. Every
/// position at or beyond the live count behaves as a `+inf` key that is never
/// read or written, so non-power-of-two counts sort correctly.

use crate::particles::{AliveEntry, SortConstants, SORT_GROUP_SIZE};

/// Compare-and-swap pairs handled by one sort thread group
pub const PAIRS_PER_GROUP: u32 = SORT_GROUP_SIZE / 2;

/// Whether the initial pass alone sorts `capacity` elements
pub fn initial_sort_done(capacity: u32) -> bool {
    (capacity.saturating_sub(1) >> 9) + 1 <= 1
}

/// Indirect dispatch arguments of the initial pass for `count` live elements
pub fn sort_dispatch_args(count: u32) -> [u32; 4] {
    let groups = if count == 0 { 0 } else { ((count - 1) >> 9) + 1 };
    [groups, 1, 1, 0]
}

/// Dispatches of one incremental pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalPass {
    /// Groups of every step and of the inner dispatch
    pub group_count: u32,
    /// Global merge steps, in order
    pub steps: Vec<SortConstants>,
    /// Whether the list is sorted after this pass
    pub done: bool,
}

/// Plan the pass merging blocks of `presorted` sorted elements
pub fn plan_incremental(capacity: u32, presorted: u32) -> IncrementalPass {
    let mut group_count = 0;
    let mut done = true;
    if capacity > presorted {
        if capacity > presorted * 2 {
            done = false;
        }
        let mut pow2 = presorted;
        while pow2 < capacity {
            pow2 *= 2;
        }
        group_count = pow2 >> 9;
    }

    let mut steps = Vec::new();
    let mut subsize = presorted;
    while subsize > PAIRS_PER_GROUP {
        steps.push(if subsize == presorted { flip(subsize) } else { ascending(subsize) });
        subsize >>= 1;
    }

    IncrementalPass { group_count, steps, done }
}

/// Every incremental pass needed after the initial one, in order
pub fn plan_full_sort(capacity: u32) -> Vec<IncrementalPass> {
    let mut passes = Vec::new();
    let mut done = initial_sort_done(capacity);
    let mut presorted = SORT_GROUP_SIZE;
    while !done {
        let pass = plan_incremental(capacity, presorted);
        done = pass.done;
        passes.push(pass);
        presorted *= 2;
    }
    passes
}

// ===== SORTING NETWORK =====

/// Element pair compared by thread `thread` of a merge step
pub fn step_pair(thread: u32, constants: &SortConstants) -> (u32, u32) {
    let low = thread & (constants.block_size as u32 - 1);
    let high = 2 * (thread - low);
    let index = high + low;
    let swap = high as i64 + constants.swap_offset as i64 + constants.swap_sign as i64 * low as i64;
    (index, swap as u32)
}

fn run_local_step(block: &mut [AliveEntry], constants: &SortConstants) {
    for thread in 0..PAIRS_PER_GROUP {
        let (i, j) = step_pair(thread, constants);
        let (i, j) = (i as usize, j as usize);
        if block[i].sort_key > block[j].sort_key {
            block.swap(i, j);
        }
    }
}

fn flip(subsize: u32) -> SortConstants {
    let block_size = subsize as i32;
    SortConstants { block_size, swap_offset: 2 * block_size - 1, swap_sign: -1, _padding: 0 }
}

fn ascending(subsize: u32) -> SortConstants {
    let block_size = subsize as i32;
    SortConstants { block_size, swap_offset: block_size, swap_sign: 1, _padding: 0 }
}

/// Sort one 512-element block ascending with the bitonic network
pub fn sort_block(block: &mut [AliveEntry]) {
    debug_assert_eq!(block.len(), SORT_GROUP_SIZE as usize);
    let mut merge_size = 2;
    while merge_size <= SORT_GROUP_SIZE {
        run_local_step(block, &flip(merge_size / 2));
        let mut subsize = merge_size / 4;
        while subsize > 0 {
            run_local_step(block, &ascending(subsize));
            subsize /= 2;
        }
        merge_size *= 2;
    }
}

/// Finish a merge inside one 512-element block (steps 256 down to 1)
pub fn merge_block(block: &mut [AliveEntry]) {
    debug_assert_eq!(block.len(), SORT_GROUP_SIZE as usize);
    let mut subsize = PAIRS_PER_GROUP;
    while subsize > 0 {
        run_local_step(block, &ascending(subsize));
        subsize /= 2;
    }
}

#[cfg(test)]
#[path = "bitonic_sort_tests.rs"]
mod tests;
