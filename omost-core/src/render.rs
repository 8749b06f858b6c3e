//! Canvas preview rendering: paints each region's occlusion mask so a
//! layout can be eyeballed before any diffusion run.

use image::{DynamicImage, Rgb, RgbImage};

use crate::canvas::{compute_masks, Canvas, CANVAS_SIZE};

/// Upscale factor from canvas cells to pixels.
const CELL_PIXELS: u32 = 8;

/// Background color of cells only the global region covers.
const GLOBAL_COLOR: Rgb<u8> = Rgb([48, 48, 48]);

const PALETTE: [Rgb<u8>; 8] = [
    Rgb([214, 73, 51]),
    Rgb([59, 120, 204]),
    Rgb([85, 168, 74]),
    Rgb([230, 165, 46]),
    Rgb([145, 82, 191]),
    Rgb([52, 175, 170]),
    Rgb([222, 104, 161]),
    Rgb([148, 143, 62]),
];

/// Render the canvas to an image, one color per non-global region. The
/// non-global masks are disjoint, so each cell has at most one color.
pub fn render_canvas(canvas: &Canvas) -> DynamicImage {
    let masks = compute_masks(canvas);
    let side = CANVAS_SIZE as u32 * CELL_PIXELS;

    let image = RgbImage::from_fn(side, side, |x, y| {
        let row = (y / CELL_PIXELS) as usize;
        let col = (x / CELL_PIXELS) as usize;
        for (index, mask) in masks.iter().enumerate().skip(1) {
            if mask.get(row, col) != 0.0 {
                return PALETTE[(index - 1) % PALETTE.len()];
            }
        }
        GLOBAL_COLOR
    });

    DynamicImage::ImageRgb8(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::CanvasRegion;

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

    #[test]
    fn image_has_upscaled_canvas_dimensions() {
        let image = render_canvas(&canvas_of(&[[0, 90, 0, 90]]));
        assert_eq!(image.width(), 720);
        assert_eq!(image.height(), 720);
    }

    #[test]
    fn uncovered_cells_use_the_global_color() {
        let image = render_canvas(&canvas_of(&[[0, 90, 0, 90], [10, 20, 10, 20]]))
            .to_rgb8();
        // Cell (0, 0) is outside the region; cell (15, 15) is inside.
        assert_eq!(*image.get_pixel(0, 0), GLOBAL_COLOR);
        assert_eq!(*image.get_pixel(15 * CELL_PIXELS, 15 * CELL_PIXELS), PALETTE[0]);
    }

    #[test]
    fn occluded_cells_take_the_winning_region_color() {
        // Region 2 overlaps region 1 and wins.
        let image = render_canvas(&canvas_of(&[
            [0, 90, 0, 90],
            [10, 40, 10, 40],
            [20, 60, 20, 60],
        ]))
        .to_rgb8();
        assert_eq!(*image.get_pixel(30 * CELL_PIXELS, 30 * CELL_PIXELS), PALETTE[1]);
        assert_eq!(*image.get_pixel(12 * CELL_PIXELS, 12 * CELL_PIXELS), PALETTE[0]);
    }
}
