//! Turns a render list into positioned draw commands.
//!
//! Positions are in content pixels (the full scrollable timeline). The host
//! subtracts [`Frame::scroll_offset_px`] to get screen coordinates.

use std::sync::Arc;

use crate::scheduler::RenderList;
use crate::tile::{playhead_x_px, Raster, TileKey, RASTER_HEIGHT_PX};

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    /// Stretch `raster` over the given box.
    Raster {
        left_px: f64,
        width_px: f64,
        height_px: f64,
        key: TileKey,
        raster: Arc<Raster>,
    },
    /// A tile that has not been computed (yet).
    Placeholder {
        left_px: f64,
        width_px: f64,
        height_px: f64,
        key: TileKey,
    },
    Cursor {
        x_px: f64,
        width_px: f64,
        height_px: f64,
    },
    Label {
        x_px: f64,
        text: String,
    },
}

/// What an overlay gets to know about the current frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayContext {
    pub zoom_px_per_second: f64,
    pub scroll_offset_px: f64,
    pub viewport_width_px: f64,
    pub total_width_px: f64,
    pub height_px: f64,
    pub playhead_seconds: f64,
}

impl OverlayContext {
    pub fn time_to_x(&self, seconds: f64) -> f64 {
        playhead_x_px(seconds, self.zoom_px_per_second)
    }

    pub fn is_visible(&self, x_px: f64) -> bool {
        x_px >= self.scroll_offset_px && x_px <= self.scroll_offset_px + self.viewport_width_px
    }
}

/// Something drawn between the tiles and the cursor, e.g. lyrics.
pub trait Overlay: Send + Sync {
    fn draw(&self, ctx: &OverlayContext, out: &mut Vec<DrawCommand>);
}

/// Text pinned to points in time.
#[derive(Debug, Clone, Default)]
pub struct TimedLabels {
    labels: Vec<(f64, String)>,
}

impl TimedLabels {
    pub fn new(mut labels: Vec<(f64, String)>) -> Self {
        labels.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Overlay for TimedLabels {
    fn draw(&self, ctx: &OverlayContext, out: &mut Vec<DrawCommand>) {
        for (seconds, text) in &self.labels {
            let x_px = ctx.time_to_x(*seconds);
            if ctx.is_visible(x_px) {
                out.push(DrawCommand::Label {
                    x_px,
                    text: text.clone(),
                });
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Back to front.
    pub commands: Vec<DrawCommand>,
    pub total_width_px: f64,
    pub scroll_offset_px: f64,
    pub viewport_width_px: f64,
    pub degraded: bool,
}

impl Frame {
    pub fn raster_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Raster { .. }))
            .count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::Placeholder { .. }))
            .count()
    }

    pub fn cursor_x(&self) -> Option<f64> {
        self.commands.iter().find_map(|c| match c {
            DrawCommand::Cursor { x_px, .. } => Some(*x_px),
            _ => None,
        })
    }
}

/// Tiles in index order, then the overlay, then the playhead cursor on top.
pub fn compose(
    render_list: &RenderList,
    playhead_seconds: f64,
    overlay: Option<&dyn Overlay>,
) -> Frame {
    let mut frame = Frame {
        commands: Vec::with_capacity(render_list.tiles.len() + 1),
        total_width_px: render_list.total_width_px,
        scroll_offset_px: render_list.scroll_offset_px,
        viewport_width_px: render_list.viewport_width_px,
        degraded: render_list.health.is_degraded(),
    };
    if render_list.is_empty() {
        return frame;
    }

    let height_px = RASTER_HEIGHT_PX as f64;
    for tile in &render_list.tiles {
        let command = match &tile.raster {
            Some(raster) => DrawCommand::Raster {
                left_px: tile.left_px,
                width_px: tile.width_px,
                height_px,
                key: tile.key,
                raster: raster.clone(),
            },
            None => DrawCommand::Placeholder {
                left_px: tile.left_px,
                width_px: tile.width_px,
                height_px,
                key: tile.key,
            },
        };
        frame.commands.push(command);
    }

    if let Some(overlay) = overlay {
        let ctx = OverlayContext {
            zoom_px_per_second: render_list.zoom_px_per_second,
            scroll_offset_px: render_list.scroll_offset_px,
            viewport_width_px: render_list.viewport_width_px,
            total_width_px: render_list.total_width_px,
            height_px,
            playhead_seconds,
        };
        overlay.draw(&ctx, &mut frame.commands);
    }

    if playhead_seconds.is_finite() {
        frame.commands.push(DrawCommand::Cursor {
            x_px: playhead_x_px(playhead_seconds, render_list.zoom_px_per_second),
            width_px: 1.0,
            height_px,
        });
    }

    frame
}
