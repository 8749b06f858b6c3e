//! Turn a canvas into per-region conditioning records.

use anyhow::Result;
use candle_core::Tensor;

use crate::canvas::{compute_masks, Canvas, RegionMask};
use crate::encoder::{encode_bag_of_subprompts, TextEncoder};
use crate::params::LayoutParams;

/// Host-native conditioning record for one region: encoded text paired
/// with the region's occlusion mask and blend strength.
#[derive(Debug, Clone)]
pub struct RegionConditioning {
    pub cond: Tensor,
    pub pooled: Tensor,
    pub mask: RegionMask,
    pub strength: f32,
}

/// Encode every canvas region and attach its mask and strength.
///
/// The global region keeps all its prefixes; non-global regions drop the
/// first prefix, which is the canvas-wide lead-in that would otherwise be
/// repeated in every region prompt.
pub fn layout_cond(
    encoder: &dyn TextEncoder,
    canvas: &Canvas,
    params: &LayoutParams,
) -> Result<Vec<RegionConditioning>> {
    params.validate()?;
    let masks = compute_masks(canvas);

    let mut conds = Vec::with_capacity(canvas.len());
    for (index, (region, mask)) in canvas.regions().iter().zip(masks).enumerate() {
        let is_global = index == 0;
        let prefixes = if is_global {
            &region.prefixes[..]
        } else {
            region.prefixes.get(1..).unwrap_or(&[])
        };
        let encoded = encode_bag_of_subprompts(encoder, prefixes, &region.suffixes)?;
        conds.push(RegionConditioning {
            cond: encoded.cond,
            pooled: encoded.pooled,
            mask,
            strength: if is_global {
                params.global_strength
            } else {
                params.region_strength
            },
        });
    }
    Ok(conds)
}
