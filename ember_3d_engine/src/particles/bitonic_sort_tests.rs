use super::*;

fn entries(keys: &[f32]) -> Vec<AliveEntry> {
    keys.iter().enumerate().map(|(i, &k)| AliveEntry { sort_key: k, index: i as u32 }).collect()
}

fn pseudo_random_keys(count: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 10_000) as f32 * 0.01 - 50.0
        })
        .collect()
}

fn is_sorted(block: &[AliveEntry]) -> bool {
    block.windows(2).all(|w| w[0].sort_key <= w[1].sort_key)
}

#[test]
fn test_initial_sort_done_up_to_one_block() {
    assert!(initial_sort_done(1));
    assert!(initial_sort_done(100));
    assert!(initial_sort_done(512));
    assert!(!initial_sort_done(513));
    assert!(!initial_sort_done(1024));
}

#[test]
fn test_one_incremental_pass_finishes_1024() {
    let pass = plan_incremental(1024, 512);
    assert!(pass.done);
    assert_eq!(pass.group_count, 2);
    // 512 > 256 gives one flip step; the rest happens in the inner dispatch
    assert_eq!(pass.steps, vec![SortConstants { block_size: 512, swap_offset: 1023, swap_sign: -1, _padding: 0 }]);
}

#[test]
fn test_incremental_steps_flip_then_ascending() {
    let pass = plan_incremental(4096, 2048);
    assert!(pass.done);
    assert_eq!(pass.group_count, 8);
    let sizes: Vec<_> = pass.steps.iter().map(|s| (s.block_size, s.swap_offset, s.swap_sign)).collect();
    assert_eq!(sizes, vec![(2048, 4095, -1), (1024, 1024, 1), (512, 512, 1)]);
}

#[test]
fn test_incremental_not_done_while_capacity_exceeds_merge() {
    let pass = plan_incremental(3000, 512);
    assert!(!pass.done);
    assert_eq!(pass.group_count, 4096 >> 9);
}

#[test]
fn test_full_sort_pass_count() {
    assert!(plan_full_sort(512).is_empty());
    assert_eq!(plan_full_sort(1024).len(), 1);
    assert_eq!(plan_full_sort(1025).len(), 2);
    assert_eq!(plan_full_sort(400 * 1024).len(), 10);
}

#[test]
fn test_sort_dispatch_args() {
    assert_eq!(sort_dispatch_args(0), [0, 1, 1, 0]);
    assert_eq!(sort_dispatch_args(1), [1, 1, 1, 0]);
    assert_eq!(sort_dispatch_args(512), [1, 1, 1, 0]);
    assert_eq!(sort_dispatch_args(513), [2, 1, 1, 0]);
}

#[test]
fn test_step_pair_flip_and_ascending() {
    let flip_4 = SortConstants { block_size: 2, swap_offset: 3, swap_sign: -1, _padding: 0 };
    assert_eq!(step_pair(0, &flip_4), (0, 3));
    assert_eq!(step_pair(1, &flip_4), (1, 2));
    assert_eq!(step_pair(2, &flip_4), (4, 7));

    let ascending_2 = SortConstants { block_size: 2, swap_offset: 2, swap_sign: 1, _padding: 0 };
    assert_eq!(step_pair(0, &ascending_2), (0, 2));
    assert_eq!(step_pair(1, &ascending_2), (1, 3));
    assert_eq!(step_pair(2, &ascending_2), (4, 6));
}

#[test]
fn test_sort_block_sorts_random_keys() {
    let mut block = entries(&pseudo_random_keys(512, 7));
    sort_block(&mut block);
    assert!(is_sorted(&block));

    let mut indices: Vec<_> = block.iter().map(|e| e.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..512).collect::<Vec<_>>());
}

#[test]
fn test_sort_block_keeps_sentinels_last() {
    let mut keys = pseudo_random_keys(300, 3);
    keys.resize(512, f32::INFINITY);
    let mut block = entries(&keys);
    sort_block(&mut block);
    assert!(is_sorted(&block));
    assert!(block[..300].iter().all(|e| e.sort_key.is_finite()));
}

#[test]
fn test_merge_block_sorts_bitonic_sequence() {
    let mut block = entries(&pseudo_random_keys(512, 11));
    block[..256].sort_by(|a, b| a.sort_key.total_cmp(&b.sort_key));
    block[256..].sort_by(|a, b| b.sort_key.total_cmp(&a.sort_key));
    merge_block(&mut block);
    assert!(is_sorted(&block));
}
