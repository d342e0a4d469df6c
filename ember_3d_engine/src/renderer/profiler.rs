/// GPU timestamp profiler
///
/// Each named block gets a pair of timestamp queries per in-flight frame,
/// allocated the first time the block is profiled in that frame slot. Results
/// are read from the oldest frame of the ring, which the GPU has normally
/// finished by then, so reading them does not stall.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use rustc_hash::FxHashMap;
use crate::error::Result;
use crate::engine_warn;
use crate::graphics_device::{GraphicsDevice, QueryHandle, QueryKind};
use crate::renderer::CommandContext;

/// Frames in flight
pub const FRAME_COUNT: usize = 3;
/// Maximum number of distinct named blocks
pub const MAX_QUERIES: usize = 256;

/// Measured duration of one named block
#[derive(Debug, Clone, PartialEq)]
pub struct Timestamp {
    pub name: String,
    pub time_in_ms: f32,
}

struct BlockQueries {
    start: QueryHandle,
    end: QueryHandle,
    begin_called: bool,
    end_called: bool,
}

pub struct GpuProfiler {
    device: Arc<dyn GraphicsDevice>,
    enabled: bool,
    current_frame: u64,
    queries: [Vec<Option<BlockQueries>>; FRAME_COUNT],
    name_to_index: FxHashMap<String, usize>,
    names: Vec<String>,
}

impl GpuProfiler {
    /// Create a profiler; when `enabled` is false every call is a no-op
    pub fn new(device: Arc<dyn GraphicsDevice>, enabled: bool) -> Self {
        Self {
            device,
            enabled,
            current_frame: 0,
            queries: Default::default(),
            name_to_index: FxHashMap::default(),
            names: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool { self.enabled }

    /// Advance the frame ring
    pub fn new_frame(&mut self) {
        self.current_frame += 1;
    }

    fn frame_slot(&self) -> usize {
        (self.current_frame % FRAME_COUNT as u64) as usize
    }

    fn block_index(&mut self, name: &str) -> Option<usize> {
        if let Some(&index) = self.name_to_index.get(name) {
            return Some(index);
        }
        if self.names.len() >= MAX_QUERIES {
            engine_warn!("ember3d::GpuProfiler", "Too many profiled blocks, '{}' ignored", name);
            return None;
        }
        let index = self.names.len();
        self.names.push(name.to_string());
        self.name_to_index.insert(name.to_string(), index);
        Some(index)
    }

    fn block_queries(&mut self, slot: usize, index: usize) -> Result<&mut BlockQueries> {
        let frame = &mut self.queries[slot];
        if frame.len() <= index {
            frame.resize_with(index + 1, || None);
        }
        let block = match frame[index].take() {
            Some(block) => block,
            None => BlockQueries {
                start: self.device.create_query(QueryKind::Timestamp)?,
                end: self.device.create_query(QueryKind::Timestamp)?,
                begin_called: false,
                end_called: false,
            },
        };
        Ok(frame[index].insert(block))
    }

    /// Write the start timestamp of block `name`
    pub fn begin_block(&mut self, ctx: &mut CommandContext, name: &str) {
        if !self.enabled {
            return;
        }
        let Some(index) = self.block_index(name) else { return };
        let slot = self.frame_slot();
        match self.block_queries(slot, index) {
            Ok(block) => {
                block.begin_called = true;
                block.end_called = false;
                ctx.end_query(block.start);
            }
            Err(err) => engine_warn!("ember3d::GpuProfiler", "Cannot profile '{}': {}", name, err),
        }
    }

    /// Write the end timestamp of block `name`
    pub fn end_block(&mut self, ctx: &mut CommandContext, name: &str) {
        if !self.enabled {
            return;
        }
        let Some(&index) = self.name_to_index.get(name) else { return };
        let slot = self.frame_slot();
        if let Some(Some(block)) = self.queries[slot].get_mut(index) {
            if block.begin_called {
                block.end_called = true;
                ctx.end_query(block.end);
            }
        }
    }

    /// Profile until the returned guard is dropped
    pub fn scope<'a>(&'a mut self, ctx: &'a mut CommandContext, name: &'a str) -> ProfileScope<'a> {
        self.scope_if(ctx, name, true)
    }

    /// Like `scope`, but only profiles when `active` is true
    pub fn scope_if<'a>(&'a mut self, ctx: &'a mut CommandContext, name: &'a str, active: bool) -> ProfileScope<'a> {
        if active {
            self.begin_block(ctx, name);
        }
        ProfileScope { profiler: self, ctx, name, active }
    }

    /// Completed blocks of the oldest frame in the ring
    ///
    /// Blocks whose queries have not resolved yet are skipped. Reported
    /// blocks are consumed.
    pub fn results(&mut self) -> Vec<Timestamp> {
        if !self.enabled || self.current_frame < (FRAME_COUNT - 1) as u64 {
            return Vec::new();
        }
        let slot = ((self.current_frame + 1) % FRAME_COUNT as u64) as usize;
        let ticks_per_ms = self.device.timestamp_frequency() as f64 / 1000.0;

        let mut results = Vec::new();
        for (index, entry) in self.queries[slot].iter_mut().enumerate() {
            let Some(block) = entry else { continue };
            if !(block.begin_called && block.end_called) {
                continue;
            }
            let start = self.device.query_data(block.start);
            let end = self.device.query_data(block.end);
            let (Ok(Some(start)), Ok(Some(end))) = (start, end) else { continue };

            block.begin_called = false;
            block.end_called = false;
            results.push(Timestamp {
                name: self.names[index].clone(),
                time_in_ms: (end.saturating_sub(start) as f64 / ticks_per_ms) as f32,
            });
        }
        results
    }
}

impl Drop for GpuProfiler {
    fn drop(&mut self) {
        for frame in &mut self.queries {
            for block in frame.drain(..).flatten() {
                self.device.destroy_query(block.start);
                self.device.destroy_query(block.end);
            }
        }
    }
}

// ===== SCOPE GUARD =====

/// Profiled block guard; dereferences to the command context
pub struct ProfileScope<'a> {
    profiler: &'a mut GpuProfiler,
    ctx: &'a mut CommandContext,
    name: &'a str,
    active: bool,
}

impl Deref for ProfileScope<'_> {
    type Target = CommandContext;

    fn deref(&self) -> &CommandContext {
        self.ctx
    }
}

impl DerefMut for ProfileScope<'_> {
    fn deref_mut(&mut self) -> &mut CommandContext {
        self.ctx
    }
}

impl Drop for ProfileScope<'_> {
    fn drop(&mut self) {
        if self.active {
            self.profiler.end_block(self.ctx, self.name);
        }
    }
}

#[cfg(test)]
#[path = "profiler_tests.rs"]
mod tests;
