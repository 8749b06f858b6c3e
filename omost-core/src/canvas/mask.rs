//! Occlusion mask computation for overlapping canvas regions.

use candle_core::{Device, Tensor};

use super::{Canvas, CANVAS_SIZE};

/// A per-region weight grid over the canvas. Values are 0.0 or 1.0 here
/// but the grid is real-valued: downstream samplers use it as a continuous
/// blend weight.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionMask {
    data: Vec<f32>,
}

impl RegionMask {
    pub fn zeros() -> Self {
        Self {
            data: vec![0.0; CANVAS_SIZE * CANVAS_SIZE],
        }
    }

    pub fn ones() -> Self {
        Self {
            data: vec![1.0; CANVAS_SIZE * CANVAS_SIZE],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * CANVAS_SIZE + col]
    }

    fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * CANVAS_SIZE + col] = value;
    }

    /// Number of cells this mask claims.
    pub fn coverage(&self) -> usize {
        self.data.iter().filter(|v| **v != 0.0).count()
    }

    /// Convert into a `(CANVAS_SIZE, CANVAS_SIZE)` f32 tensor for the
    /// conditioning consumer.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::from_vec(self.data.clone(), (CANVAS_SIZE, CANVAS_SIZE), device)
    }
}

/// Compute the occlusion mask of every region, in region order.
///
/// Region 0 (global) gets the all-ones grid regardless of its rect. The
/// remaining regions are walked in reverse: each one's mask is its rect
/// indicator minus whatever cells regions later in the list already
/// claimed, so on overlap the last region in the list wins. Pure: the
/// canvas is untouched and masks come back as a separate vector.
pub fn compute_masks(canvas: &Canvas) -> Vec<RegionMask> {
    let regions = canvas.regions();
    let mut masks = vec![RegionMask::zeros(); regions.len()];
    masks[0] = RegionMask::ones();

    let mut claimed = RegionMask::zeros();
    for index in (1..regions.len()).rev() {
        let rect = &regions[index].rect;
        let mask = &mut masks[index];
        for row in rect.row_start..rect.row_end {
            for col in rect.col_start..rect.col_end {
                if claimed.get(row, col) == 0.0 {
                    mask.set(row, col, 1.0);
                    claimed.set(row, col, 1.0);
                }
            }
        }
    }

    masks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasRegion, Rect};

    fn canvas_of(rects: &[[usize; 4]]) -> Canvas {
        let regions = rects
            .iter()
            .map(|rect| CanvasRegion {
                rect: (*rect).into(),
                prefixes: vec![],
                suffixes: vec!["x".to_string()],
            })
            .collect();
        Canvas::new(regions).unwrap()
    }

    fn rect_cells(rect: Rect) -> impl Iterator<Item = (usize, usize)> {
        (rect.row_start..rect.row_end)
            .flat_map(move |r| (rect.col_start..rect.col_end).map(move |c| (r, c)))
    }

    #[test]
    fn global_mask_is_all_ones_regardless_of_rect() {
        // Global rect deliberately not full-canvas.
        let canvas = canvas_of(&[[10, 20, 10, 20]]);
        let masks = compute_masks(&canvas);
        assert_eq!(masks[0], RegionMask::ones());
    }

    #[test]
    fn later_region_wins_on_overlap() {
        let canvas = canvas_of(&[[0, 90, 0, 90], [0, 90, 0, 90], [10, 20, 10, 20]]);
        let masks = compute_masks(&canvas);

        // The nested region keeps its whole rect.
        assert_eq!(masks[2].coverage(), 100);
        for (r, c) in rect_cells(Rect::new(10, 20, 10, 20)) {
            assert_eq!(masks[2].get(r, c), 1.0);
        }

        // The full-canvas region cedes exactly that block.
        assert_eq!(masks[1].coverage(), 90 * 90 - 100);
        assert_eq!(masks[1].get(15, 15), 0.0);
        assert_eq!(masks[1].get(5, 5), 1.0);
    }

    #[test]
    fn non_global_masks_are_pairwise_disjoint() {
        let canvas = canvas_of(&[
            [0, 90, 0, 90],
            [0, 50, 0, 50],
            [20, 70, 20, 70],
            [40, 90, 40, 90],
        ]);
        let masks = compute_masks(&canvas);
        for i in 1..masks.len() {
            for j in i + 1..masks.len() {
                for r in 0..CANVAS_SIZE {
                    for c in 0..CANVAS_SIZE {
                        assert!(
                            masks[i].get(r, c) == 0.0 || masks[j].get(r, c) == 0.0,
                            "masks {i} and {j} both claim cell ({r}, {c})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn masks_stay_inside_their_rect() {
        let canvas = canvas_of(&[[0, 90, 0, 90], [30, 60, 10, 40], [50, 80, 30, 70]]);
        let masks = compute_masks(&canvas);
        for (region, mask) in canvas.regions().iter().zip(&masks).skip(1) {
            let inside: std::collections::HashSet<_> = rect_cells(region.rect).collect();
            for r in 0..CANVAS_SIZE {
                for c in 0..CANVAS_SIZE {
                    if !inside.contains(&(r, c)) {
                        assert_eq!(mask.get(r, c), 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn compute_is_idempotent() {
        let canvas = canvas_of(&[[0, 90, 0, 90], [0, 50, 0, 50], [20, 70, 20, 70]]);
        assert_eq!(compute_masks(&canvas), compute_masks(&canvas));
    }

    #[test]
    fn zero_area_rect_yields_zero_mask() {
        let canvas = canvas_of(&[[0, 90, 0, 90], [5, 5, 5, 5]]);
        let masks = compute_masks(&canvas);
        assert_eq!(masks[1], RegionMask::zeros());
    }

    #[test]
    fn single_region_canvas() {
        let canvas = canvas_of(&[[0, 90, 0, 90]]);
        let masks = compute_masks(&canvas);
        assert_eq!(masks.len(), 1);
        assert_eq!(masks[0].coverage(), CANVAS_SIZE * CANVAS_SIZE);
    }

    #[test]
    fn mask_converts_to_square_tensor() {
        let canvas = canvas_of(&[[0, 90, 0, 90], [10, 20, 10, 20]]);
        let masks = compute_masks(&canvas);
        let tensor = masks[1].to_tensor(&Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[CANVAS_SIZE, CANVAS_SIZE]);
        let sum = tensor.sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert_eq!(sum, 100.0);
    }
}
