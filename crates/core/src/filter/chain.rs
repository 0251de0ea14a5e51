//! Typed filter-chain representation and its filtergraph rendering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Filter kinds the mapper emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Delogo,
    Format,
    DrawBox,
    Split,
    EdgeDetect,
    ColorKey,
    Erosion,
    Dilation,
    Blend,
    GaussianBlur,
}

impl FilterKind {
    /// Filter name in filtergraph syntax.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            Self::Delogo => "delogo",
            Self::Format => "format",
            Self::DrawBox => "drawbox",
            Self::Split => "split",
            Self::EdgeDetect => "edgedetect",
            Self::ColorKey => "colorkey",
            Self::Erosion => "erosion",
            Self::Dilation => "dilation",
            Self::Blend => "blend",
            Self::GaussianBlur => "gblur",
        }
    }

    /// Stages that make the watermark region transparent.
    pub fn is_watermark_mask(&self) -> bool {
        matches!(self, Self::Delogo | Self::DrawBox)
    }
}

/// Frame dimension a fractional coordinate is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAxis {
    Width,
    Height,
}

/// A filter parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamValue {
    Int { value: i64 },
    /// Rendered with a fixed number of decimals.
    Decimal { value: f64, precision: u8 },
    /// A fraction of the input frame size, rendered as `iw*0.0120`.
    FrameFraction { axis: FrameAxis, fraction: f64 },
    Text { value: String },
}

impl ParamValue {
    pub fn int(value: i64) -> Self {
        Self::Int { value }
    }

    pub fn decimal(value: f64, precision: u8) -> Self {
        Self::Decimal { value, precision }
    }

    pub fn frame_fraction(axis: FrameAxis, fraction: f64) -> Self {
        Self::FrameFraction { axis, fraction }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }

    /// Numeric value, if the parameter is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int { value } => Some(*value as f64),
            Self::Decimal { value, .. } => Some(*value),
            Self::FrameFraction { fraction, .. } => Some(*fraction),
            Self::Text { .. } => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int { value } => write!(f, "{}", value),
            Self::Decimal { value, precision } => {
                write!(f, "{:.*}", usize::from(*precision), value)
            }
            Self::FrameFraction { axis, fraction } => {
                let dim = match axis {
                    FrameAxis::Width => "iw",
                    FrameAxis::Height => "ih",
                };
                write!(f, "{}*{:.4}", dim, fraction)
            }
            Self::Text { value } => f.write_str(value),
        }
    }
}

/// A named parameter of a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParam {
    pub name: String,
    pub value: ParamValue,
}

/// One filter invocation with its pad labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterStage {
    pub kind: FilterKind,
    #[serde(default)]
    pub params: Vec<FilterParam>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
}

impl FilterStage {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            params: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: ParamValue) -> Self {
        self.params.push(FilterParam {
            name: name.to_string(),
            value,
        });
        self
    }

    pub fn input(mut self, label: &str) -> Self {
        self.inputs.push(label.to_string());
        self
    }

    pub fn output(mut self, label: &str) -> Self {
        self.outputs.push(label.to_string());
        self
    }

    /// Looks up a parameter by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    fn has_labels(&self) -> bool {
        !self.inputs.is_empty() || !self.outputs.is_empty()
    }
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for label in &self.inputs {
            write!(f, "[{}]", label)?;
        }
        f.write_str(self.kind.ffmpeg_name())?;
        for (i, param) in self.params.iter().enumerate() {
            let sep = if i == 0 { '=' } else { ':' };
            write!(f, "{}{}={}", sep, param.name, param.value)?;
        }
        for label in &self.outputs {
            write!(f, "[{}]", label)?;
        }
        Ok(())
    }
}

/// An ordered list of stages forming one filtergraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterChain {
    pub stages: Vec<FilterStage>,
}

impl FilterChain {
    pub fn new(stages: Vec<FilterStage>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Index of the first stage of `kind`.
    pub fn position(&self, kind: FilterKind) -> Option<usize> {
        self.stages.iter().position(|s| s.kind == kind)
    }

    /// Stages of `kind`, in order.
    pub fn stages_of(&self, kind: FilterKind) -> impl Iterator<Item = &FilterStage> {
        self.stages.iter().filter(move |s| s.kind == kind)
    }

    /// Renders filtergraph syntax.
    ///
    /// Consecutive unlabeled stages are joined with `,`; a stage with input
    /// labels, or one following a stage with output labels, starts a new
    /// chain after `;`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut prev: Option<&FilterStage> = None;
        for stage in &self.stages {
            if let Some(prev) = prev {
                let new_chain = !prev.outputs.is_empty() || !stage.inputs.is_empty();
                out.push(if new_chain { ';' } else { ',' });
            }
            out.push_str(&stage.to_string());
            prev = Some(stage);
        }
        out
    }

    /// Whether the chain uses pad labels anywhere.
    pub fn is_labeled(&self) -> bool {
        self.stages.iter().any(FilterStage::has_labels)
    }
}
