/// Render pass description: attachments with load/store operations

use crate::graphics_device::TextureViewHandle;

/// What happens to a color attachment at the start of a pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorLoadOp {
    Load,
    Clear([f32; 4]),
    DontCare,
}

/// What happens to a depth attachment at the start of a pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthLoadOp {
    Load,
    Clear { depth: f32, stencil: u8 },
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: ColorLoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    pub view: TextureViewHandle,
    pub load_op: DepthLoadOp,
    pub store_op: StoreOp,
    /// Depth is bound read-only and may also be sampled during the pass
    pub read_only: bool,
}

/// Attachments of one render pass, in binding order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderPassDesc {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
    pub width: u32,
    pub height: u32,
}

impl RenderPassDesc {
    /// Pass with no attachments covering `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, ..Default::default() }
    }

    pub fn with_color(mut self, view: TextureViewHandle, load_op: ColorLoadOp) -> Self {
        self.color_attachments.push(ColorAttachment { view, load_op, store_op: StoreOp::Store });
        self
    }

    pub fn with_depth(mut self, view: TextureViewHandle, load_op: DepthLoadOp, read_only: bool) -> Self {
        self.depth_attachment = Some(DepthAttachment {
            view,
            load_op,
            store_op: if read_only { StoreOp::DontCare } else { StoreOp::Store },
            read_only,
        });
        self
    }
}
