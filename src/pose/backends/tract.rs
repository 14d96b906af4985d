#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::frame::Frame;
use crate::ingest::normalize::resize_to;
use crate::pose::estimator::PoseEstimator;
use crate::pose::{Landmark, LandmarkSet, LANDMARK_COUNT};

/// Values per landmark in the model output: x, y, z, visibility, presence.
const VALUES_PER_LANDMARK: usize = 5;

/// Tract backend for BlazePose-style landmark models exported to ONNX.
///
/// Expects an NHWC float input in [0,1] and a first output of at least
/// `33 * 5` values in input-pixel coordinates. An optional second output carries the
/// pose presence score.
pub struct TractEstimator {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    presence_threshold: f32,
}

impl TractEstimator {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, size, size, 3)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            presence_threshold: 0.5,
        })
    }

    /// Override the default presence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let resized = resize_to(frame.clone(), self.input_size, self.input_size)?;
        let size = self.input_size as usize;
        let pixels = resized.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
            pixels[(y * size + x) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<Option<LandmarkSet>> {
        if let Some(score) = outputs.get(1) {
            let score = score
                .to_array_view::<f32>()
                .context("presence output was not f32")?
                .iter()
                .copied()
                .next()
                .unwrap_or(0.0);
            let probability = if (0.0..=1.0).contains(&score) {
                score
            } else {
                1.0 / (1.0 + (-score).exp())
            };
            if probability < self.presence_threshold {
                return Ok(None);
            }
        }

        let raw = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?
            .to_array_view::<f32>()
            .context("landmark output was not f32")?;
        let values: Vec<f32> = raw.iter().copied().collect();
        if values.len() < LANDMARK_COUNT * VALUES_PER_LANDMARK {
            return Err(anyhow!(
                "landmark output has {} values, expected at least {}",
                values.len(),
                LANDMARK_COUNT * VALUES_PER_LANDMARK
            ));
        }

        let scale = self.input_size as f32;
        let points = values
            .chunks_exact(VALUES_PER_LANDMARK)
            .take(LANDMARK_COUNT)
            .enumerate()
            .map(|(i, v)| Landmark::new(i, v[0] / scale, v[1] / scale, v[2] / scale))
            .collect();
        Ok(Some(LandmarkSet::new(points)))
    }
}

impl PoseEstimator for TractEstimator {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn estimate(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(self.input_size, self.input_size, 0)?;
        self.estimate(&blank).map(|_| ())
    }
}
