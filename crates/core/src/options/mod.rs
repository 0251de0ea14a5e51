//! User-facing conversion tunables.
//!
//! A [`ConvertOptionsRequest`] is what a client sends: every field optional.
//! Resolving it against the configured [`OptionDefaults`] yields a fully
//! populated, validated [`ConvertOptions`], which is what tasks record and
//! what the filter mapper consumes.

mod color;

pub use color::RgbColor;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An option value outside its accepted range. Never clamped.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Wire name of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Conversion options as sent by a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOptionsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feather: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_enhancement: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_threshold_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_threshold_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub morphology_iterations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove_watermark: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wm_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wm_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wm_w: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wm_h: Option<f64>,
}

impl ConvertOptionsRequest {
    /// Fills unset fields from `defaults` and validates the result.
    pub fn resolve(&self, defaults: &OptionDefaults) -> Result<ConvertOptions, ValidationError> {
        let color_str = self.color.as_deref().unwrap_or(&defaults.color);
        let color = RgbColor::parse(color_str).ok_or_else(|| {
            ValidationError::new("color", format!("'{}' is not a #RRGGBB color", color_str))
        })?;

        let tolerance = int_in_range(
            "tolerance",
            self.tolerance.unwrap_or(defaults.tolerance),
            MAX_TOLERANCE,
        )?;
        let morphology_iterations = int_in_range(
            "morphologyIterations",
            self.morphology_iterations
                .unwrap_or(defaults.morphology_iterations),
            MAX_MORPHOLOGY_ITERATIONS,
        )?;

        let options = ConvertOptions {
            color,
            tolerance,
            feather: self.feather.unwrap_or(defaults.feather),
            edge_enhancement: self.edge_enhancement.unwrap_or(defaults.edge_enhancement),
            edge_threshold_low: self.edge_threshold_low.unwrap_or(defaults.edge_threshold_low),
            edge_threshold_high: self
                .edge_threshold_high
                .unwrap_or(defaults.edge_threshold_high),
            morphology_iterations,
            remove_watermark: self.remove_watermark.unwrap_or(defaults.remove_watermark),
            wm_x: self.wm_x.unwrap_or(defaults.wm_x),
            wm_y: self.wm_y.unwrap_or(defaults.wm_y),
            wm_w: self.wm_w.unwrap_or(defaults.wm_w),
            wm_h: self.wm_h.unwrap_or(defaults.wm_h),
        };
        options.validate()?;
        Ok(options)
    }
}

const MAX_TOLERANCE: u8 = 100;
const MAX_FEATHER: f64 = 10.0;
const MAX_MORPHOLOGY_ITERATIONS: u8 = 3;
// Slack for percentage sums such as 1.2 + 98.8.
const PERCENT_EPSILON: f64 = 1e-9;

fn int_in_range(field: &str, value: i64, max: u8) -> Result<u8, ValidationError> {
    if (0..=i64::from(max)).contains(&value) {
        Ok(value as u8)
    } else {
        Err(ValidationError::new(
            field,
            format!("must be between 0 and {}, got {}", max, value),
        ))
    }
}

fn float_in_range(field: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(ValidationError::new(
            field,
            format!("must be between {} and {}, got {}", min, max, value),
        ))
    }
}

/// Fully resolved conversion options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOptions {
    pub color: RgbColor,
    /// Color distance tolerance, percent.
    pub tolerance: u8,
    /// Edge softness, 0.0 to 10.0.
    pub feather: f64,
    pub edge_enhancement: bool,
    pub edge_threshold_low: f64,
    pub edge_threshold_high: f64,
    pub morphology_iterations: u8,
    pub remove_watermark: bool,
    /// Watermark region, percent of frame width/height.
    pub wm_x: f64,
    pub wm_y: f64,
    pub wm_w: f64,
    pub wm_h: f64,
}

impl ConvertOptions {
    /// Checks every range and cross-field constraint.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tolerance > MAX_TOLERANCE {
            return Err(ValidationError::new(
                "tolerance",
                format!("must be between 0 and {}", MAX_TOLERANCE),
            ));
        }
        if self.morphology_iterations > MAX_MORPHOLOGY_ITERATIONS {
            return Err(ValidationError::new(
                "morphologyIterations",
                format!("must be between 0 and {}", MAX_MORPHOLOGY_ITERATIONS),
            ));
        }
        float_in_range("feather", self.feather, 0.0, MAX_FEATHER)?;
        float_in_range("edgeThresholdLow", self.edge_threshold_low, 0.0, 1.0)?;
        float_in_range("edgeThresholdHigh", self.edge_threshold_high, 0.0, 1.0)?;
        if self.edge_threshold_low >= self.edge_threshold_high {
            return Err(ValidationError::new(
                "edgeThresholdLow",
                format!(
                    "must be lower than edgeThresholdHigh ({})",
                    self.edge_threshold_high
                ),
            ));
        }

        float_in_range("wmX", self.wm_x, 0.0, 100.0)?;
        float_in_range("wmY", self.wm_y, 0.0, 100.0)?;
        float_in_range("wmW", self.wm_w, 0.0, 100.0)?;
        float_in_range("wmH", self.wm_h, 0.0, 100.0)?;
        if self.wm_x + self.wm_w > 100.0 + PERCENT_EPSILON {
            return Err(ValidationError::new(
                "wmW",
                "wmX + wmW must not exceed 100",
            ));
        }
        if self.wm_y + self.wm_h > 100.0 + PERCENT_EPSILON {
            return Err(ValidationError::new(
                "wmH",
                "wmY + wmH must not exceed 100",
            ));
        }

        Ok(())
    }
}

/// Defaults applied to options a client leaves out (`[defaults]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionDefaults {
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_tolerance")]
    pub tolerance: i64,
    #[serde(default = "default_feather")]
    pub feather: f64,
    #[serde(default = "default_true")]
    pub edge_enhancement: bool,
    #[serde(default = "default_edge_threshold_low")]
    pub edge_threshold_low: f64,
    #[serde(default = "default_edge_threshold_high")]
    pub edge_threshold_high: f64,
    #[serde(default = "default_morphology_iterations")]
    pub morphology_iterations: i64,
    #[serde(default = "default_true")]
    pub remove_watermark: bool,
    #[serde(default = "default_wm_offset")]
    pub wm_x: f64,
    #[serde(default = "default_wm_offset")]
    pub wm_y: f64,
    #[serde(default = "default_wm_w")]
    pub wm_w: f64,
    #[serde(default = "default_wm_h")]
    pub wm_h: f64,
}

fn default_color() -> String {
    "#000000".to_string()
}

fn default_tolerance() -> i64 {
    10
}

fn default_feather() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

fn default_edge_threshold_low() -> f64 {
    0.1
}

fn default_edge_threshold_high() -> f64 {
    0.4
}

fn default_morphology_iterations() -> i64 {
    1
}

fn default_wm_offset() -> f64 {
    1.2
}

fn default_wm_w() -> f64 {
    14.0
}

fn default_wm_h() -> f64 {
    5.5
}

impl Default for OptionDefaults {
    fn default() -> Self {
        Self {
            color: default_color(),
            tolerance: default_tolerance(),
            feather: default_feather(),
            edge_enhancement: true,
            edge_threshold_low: default_edge_threshold_low(),
            edge_threshold_high: default_edge_threshold_high(),
            morphology_iterations: default_morphology_iterations(),
            remove_watermark: true,
            wm_x: default_wm_offset(),
            wm_y: default_wm_offset(),
            wm_w: default_wm_w(),
            wm_h: default_wm_h(),
        }
    }
}

impl OptionDefaults {
    /// The options used when a request sets nothing.
    pub fn to_options(&self) -> Result<ConvertOptions, ValidationError> {
        ConvertOptionsRequest::default().resolve(self)
    }
}
