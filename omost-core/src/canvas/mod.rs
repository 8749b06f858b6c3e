//! Canvas data model: the discretized 2-D plane the Omost model lays
//! regions out on, plus the JSON form exchanged with hosts.

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod mask;

pub use mask::{compute_masks, RegionMask};

/// Side length of the square canvas grid, in cells.
pub const CANVAS_SIZE: usize = 90;

/// Errors raised while building or validating a canvas.
#[derive(Debug, Error)]
pub enum CanvasError {
    /// A canvas must carry at least the global region.
    #[error("canvas has no regions")]
    EmptyCanvas,

    /// A region rectangle is inverted or leaves the canvas grid.
    #[error("region {index} has invalid rect {rect:?}: {reason}")]
    InvalidRegion {
        index: usize,
        rect: [usize; 4],
        reason: &'static str,
    },

    /// A region has no suffixes, so there is nothing to encode for it.
    #[error("region has no suffixes to encode")]
    EmptyPrompt,

    #[error("invalid canvas JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Half-open cell ranges `[row_start, row_end) x [col_start, col_end)`
/// on the canvas grid. Serialized as a flat 4-integer array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[usize; 4]", into = "[usize; 4]")]
pub struct Rect {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

impl From<[usize; 4]> for Rect {
    fn from([row_start, row_end, col_start, col_end]: [usize; 4]) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }
}

impl From<Rect> for [usize; 4] {
    fn from(r: Rect) -> Self {
        [r.row_start, r.row_end, r.col_start, r.col_end]
    }
}

impl Rect {
    pub fn new(row_start: usize, row_end: usize, col_start: usize, col_end: usize) -> Self {
        Self {
            row_start,
            row_end,
            col_start,
            col_end,
        }
    }

    /// The full canvas grid.
    pub fn full() -> Self {
        Self::new(0, CANVAS_SIZE, 0, CANVAS_SIZE)
    }

    /// Number of cells covered. Zero for degenerate rects.
    pub fn area(&self) -> usize {
        (self.row_end - self.row_start) * (self.col_end - self.col_start)
    }

    fn validate(&self, index: usize) -> Result<(), CanvasError> {
        let rect = <[usize; 4]>::from(*self);
        if self.row_start > self.row_end || self.col_start > self.col_end {
            return Err(CanvasError::InvalidRegion {
                index,
                rect,
                reason: "start exceeds end",
            });
        }
        if self.row_end > CANVAS_SIZE || self.col_end > CANVAS_SIZE {
            return Err(CanvasError::InvalidRegion {
                index,
                rect,
                reason: "rect leaves the canvas grid",
            });
        }
        Ok(())
    }
}

/// One rectangular sub-area of the canvas with its prompt fragments.
///
/// `prefixes` are shared lead-in fragments; `suffixes` are the per-prompt
/// tails, one complete prompt per suffix. The transient occlusion mask is
/// not part of this record; see [`compute_masks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasRegion {
    pub rect: Rect,
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
}

/// A validated, non-empty ordered sequence of regions. Region 0 is the
/// global region and covers the whole canvas once masks are computed,
/// regardless of its own rect.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Canvas {
    regions: Vec<CanvasRegion>,
}

impl Canvas {
    pub fn new(regions: Vec<CanvasRegion>) -> Result<Self, CanvasError> {
        if regions.is_empty() {
            return Err(CanvasError::EmptyCanvas);
        }
        for (index, region) in regions.iter().enumerate() {
            region.rect.validate(index)?;
        }
        Ok(Self { regions })
    }

    /// Parse the external JSON form: an array of `{rect, prefixes, suffixes}`
    /// objects.
    pub fn from_json_str(json: &str) -> Result<Self, CanvasError> {
        let regions: Vec<CanvasRegion> = serde_json::from_str(json)?;
        Self::new(regions)
    }

    pub fn to_json_string(&self) -> Result<String, CanvasError> {
        Ok(serde_json::to_string(&self.regions)?)
    }

    pub fn regions(&self) -> &[CanvasRegion] {
        &self.regions
    }

    pub fn global_region(&self) -> &CanvasRegion {
        &self.regions[0]
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        // A constructed canvas always has the global region.
        self.regions.is_empty()
    }
}

/// Extract the payload of the first fenced ```python block from an
/// assistant reply. Hosts with their own canvas interpreter feed this to
/// it; replies without a code block return `None`.
pub fn extract_code_block(reply: &str) -> Option<&str> {
    let start = reply.find("```python")? + "```python".len();
    let body = reply[start..].strip_prefix('\n').unwrap_or(&reply[start..]);
    let end = body.find("```")?;
    Some(body[..end].trim_end_matches('\n'))
}
