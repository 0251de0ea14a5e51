//! Translation of [`ConvertOptions`] into a [`FilterChain`].

use super::chain::{FilterChain, FilterKind, FilterStage, FrameAxis, ParamValue};
use crate::options::{ConvertOptions, RgbColor};

/// Near-black color keyed by the secondary pass.
const RESIDUE_COLOR: RgbColor = RgbColor {
    r: 0x0A,
    g: 0x0A,
    b: 0x0A,
};
const RESIDUE_SIMILARITY_BOOST: f64 = 0.05;
const RESIDUE_SIMILARITY_CAP: f64 = 0.95;
const RESIDUE_BLEND_FLOOR: f64 = 0.01;
const EDGE_BLEND_OPACITY: f64 = 0.3;
const SMOOTHING_SIGMA: f64 = 0.8;
/// All eight neighbours of the 3x3 kernel.
const MORPHOLOGY_NEIGHBOURS: i64 = 255;

/// Builds the filter chain for `options`.
///
/// Pure: equal options always produce an equal chain. Options are expected
/// to have passed [`ConvertOptions::validate`]. Coordinates are expressed
/// relative to the input frame, so the chain does not depend on the file.
pub fn build_filter_chain(options: &ConvertOptions) -> FilterChain {
    let similarity = f64::from(options.tolerance) / 100.0;
    let blend = options.feather / 10.0;

    let mut stages = Vec::new();
    if options.remove_watermark {
        stages.extend(watermark_mask(options));
    }

    if !options.edge_enhancement {
        stages.push(color_key(options.color, similarity, blend));
        return FilterChain::new(stages);
    }

    stages.push(
        FilterStage::new(FilterKind::Split)
            .param("outputs", ParamValue::int(2))
            .output("main")
            .output("edge"),
    );
    stages.push(
        FilterStage::new(FilterKind::EdgeDetect)
            .param("mode", ParamValue::text("canny"))
            .param("low", ParamValue::decimal(options.edge_threshold_low, 2))
            .param("high", ParamValue::decimal(options.edge_threshold_high, 2))
            .input("edge")
            .output("edges"),
    );
    stages.push(
        color_key(options.color, similarity, blend)
            .input("main")
            .output("keyed"),
    );

    let residue_similarity = (similarity + RESIDUE_SIMILARITY_BOOST).min(RESIDUE_SIMILARITY_CAP);
    let residue_blend = (blend * 0.5).max(RESIDUE_BLEND_FLOOR);
    let mut residue = FilterStage::new(FilterKind::ColorKey)
        .param("color", ParamValue::text(RESIDUE_COLOR.to_packed_hex()))
        .param("similarity", ParamValue::decimal(residue_similarity, 2))
        .param("blend", ParamValue::decimal(residue_blend, 4))
        .input("keyed");

    let iterations = options.morphology_iterations;
    let blend_input = if iterations == 0 {
        residue = residue.output("refined");
        stages.push(residue);
        "refined"
    } else {
        stages.push(residue);
        for _ in 0..iterations {
            stages.push(morphology(FilterKind::Erosion));
        }
        for i in 0..iterations {
            let mut stage = morphology(FilterKind::Dilation);
            if i + 1 == iterations {
                stage = stage.output("cleaned");
            }
            stages.push(stage);
        }
        "cleaned"
    };

    stages.push(
        FilterStage::new(FilterKind::Blend)
            .param("all_mode", ParamValue::text("multiply"))
            .param("all_opacity", ParamValue::decimal(EDGE_BLEND_OPACITY, 1))
            .input(blend_input)
            .input("edges")
            .output("enhanced"),
    );
    stages.push(
        FilterStage::new(FilterKind::GaussianBlur)
            .param("sigma", ParamValue::decimal(SMOOTHING_SIGMA, 1))
            .param("steps", ParamValue::int(1))
            .input("enhanced"),
    );

    FilterChain::new(stages)
}

fn color_key(color: RgbColor, similarity: f64, blend: f64) -> FilterStage {
    FilterStage::new(FilterKind::ColorKey)
        .param("color", ParamValue::text(color.to_packed_hex()))
        .param("similarity", ParamValue::decimal(similarity, 2))
        .param("blend", ParamValue::decimal(blend, 3))
}

fn morphology(kind: FilterKind) -> FilterStage {
    FilterStage::new(kind).param("coordinates", ParamValue::int(MORPHOLOGY_NEIGHBOURS))
}

/// Stages that clear the watermark region to full transparency.
///
/// `delogo` is only emitted when the region lies strictly inside the frame,
/// since it rejects areas touching the border; the transparent box alone
/// still clears the region in that case.
fn watermark_mask(options: &ConvertOptions) -> Vec<FilterStage> {
    let x = options.wm_x / 100.0;
    let y = options.wm_y / 100.0;
    let w = options.wm_w / 100.0;
    let h = options.wm_h / 100.0;

    let region = |stage: FilterStage| {
        stage
            .param("x", ParamValue::frame_fraction(FrameAxis::Width, x))
            .param("y", ParamValue::frame_fraction(FrameAxis::Height, y))
            .param("w", ParamValue::frame_fraction(FrameAxis::Width, w))
            .param("h", ParamValue::frame_fraction(FrameAxis::Height, h))
    };

    let mut stages = Vec::new();
    let inside = x > 0.0 && y > 0.0 && w > 0.0 && h > 0.0 && x + w < 1.0 && y + h < 1.0;
    if inside {
        stages.push(region(FilterStage::new(FilterKind::Delogo)).param("show", ParamValue::int(0)));
    }
    stages.push(FilterStage::new(FilterKind::Format).param("pix_fmts", ParamValue::text("rgba")));
    stages.push(
        region(FilterStage::new(FilterKind::DrawBox))
            .param("color", ParamValue::text("black@0"))
            .param("t", ParamValue::text("fill"))
            .param("replace", ParamValue::int(1)),
    );
    stages
}
