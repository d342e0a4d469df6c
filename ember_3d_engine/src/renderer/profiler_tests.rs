use super::*;
use crate::reference::ReferenceDevice;

fn setup(enabled: bool) -> (Arc<ReferenceDevice>, CommandContext, GpuProfiler) {
    let reference = Arc::new(ReferenceDevice::new());
    let device: Arc<dyn GraphicsDevice> = reference.clone();
    let ctx = CommandContext::new(Arc::clone(&device)).unwrap();
    let profiler = GpuProfiler::new(device, enabled);
    (reference, ctx, profiler)
}

fn skip_to_readback(profiler: &mut GpuProfiler) {
    for _ in 0..FRAME_COUNT - 1 {
        profiler.new_frame();
    }
}

#[test]
fn test_block_is_reported_after_frame_ring() {
    let (_, mut ctx, mut profiler) = setup(true);

    profiler.begin_block(&mut ctx, "Particles");
    ctx.draw(3);
    ctx.draw(3);
    profiler.end_block(&mut ctx, "Particles");

    assert!(profiler.results().is_empty());
    skip_to_readback(&mut profiler);

    let results = profiler.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].name, "Particles");
    assert!(results[0].time_in_ms > 0.0);
}

#[test]
fn test_results_are_consumed() {
    let (_, mut ctx, mut profiler) = setup(true);
    profiler.begin_block(&mut ctx, "Sort");
    profiler.end_block(&mut ctx, "Sort");
    skip_to_readback(&mut profiler);

    assert_eq!(profiler.results().len(), 1);
    assert!(profiler.results().is_empty());
}

#[test]
fn test_unfinished_block_is_skipped() {
    let (_, mut ctx, mut profiler) = setup(true);
    profiler.begin_block(&mut ctx, "Open");
    skip_to_readback(&mut profiler);

    assert!(profiler.results().is_empty());
}

#[test]
fn test_scope_guard_ends_block() {
    let (_, mut ctx, mut profiler) = setup(true);
    {
        let mut scope = profiler.scope(&mut ctx, "Scoped");
        scope.draw(6);
    }
    skip_to_readback(&mut profiler);

    let names: Vec<String> = profiler.results().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["Scoped".to_string()]);
}

#[test]
fn test_inactive_scope_records_nothing() {
    let (reference, mut ctx, mut profiler) = setup(true);
    {
        let mut scope = profiler.scope_if(&mut ctx, "Skipped", false);
        scope.draw(6);
    }
    assert_eq!(reference.call_count("create_query"), 0);
}

#[test]
fn test_disabled_profiler_is_noop() {
    let (reference, mut ctx, mut profiler) = setup(false);
    assert!(!profiler.is_enabled());

    profiler.begin_block(&mut ctx, "Nothing");
    profiler.end_block(&mut ctx, "Nothing");
    skip_to_readback(&mut profiler);

    assert!(profiler.results().is_empty());
    assert_eq!(reference.call_count("create_query"), 0);
}

#[test]
fn test_queries_are_reused_per_frame_slot() {
    let (reference, mut ctx, mut profiler) = setup(true);
    for _ in 0..FRAME_COUNT * 2 {
        profiler.begin_block(&mut ctx, "Frame");
        profiler.end_block(&mut ctx, "Frame");
        profiler.new_frame();
    }
    assert_eq!(reference.call_count("create_query"), (FRAME_COUNT * 2) as u64);
}

#[test]
fn test_drop_destroys_queries() {
    let (reference, mut ctx, mut profiler) = setup(true);
    profiler.begin_block(&mut ctx, "Frame");
    profiler.end_block(&mut ctx, "Frame");
    drop(profiler);
    assert_eq!(reference.call_count("destroy_query"), 2);
}
