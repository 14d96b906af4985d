//! Session time series and the end-of-session report.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::ErrorCategory;

/// Knee angle observed at a session time (seconds).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleSample {
    pub t: f64,
    pub knee_angle: f32,
}

/// Logged form error at a session time (seconds).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub t: f64,
    pub category: ErrorCategory,
}

/// An error positioned on the knee-angle chart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ErrorMarker {
    pub t: f64,
    pub category: ErrorCategory,
    /// Knee angle interpolated at `t`, or `None` when no angle was recorded.
    pub knee_angle: Option<f32>,
}

/// Read-only record of a finished session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    angles: Vec<AngleSample>,
    errors: Vec<ErrorEvent>,
    total_reps: u32,
}

impl SessionReport {
    pub(crate) fn new(angles: Vec<AngleSample>, errors: Vec<ErrorEvent>, total_reps: u32) -> Self {
        Self {
            angles,
            errors,
            total_reps,
        }
    }

    pub fn angles(&self) -> &[AngleSample] {
        &self.angles
    }

    pub fn errors(&self) -> &[ErrorEvent] {
        &self.errors
    }

    pub fn total_reps(&self) -> u32 {
        self.total_reps
    }

    /// Session length covered by the recorded samples.
    pub fn duration(&self) -> f64 {
        let last_angle = self.angles.last().map(|s| s.t).unwrap_or(0.0);
        let last_error = self.errors.last().map(|e| e.t).unwrap_or(0.0);
        last_angle.max(last_error)
    }

    pub fn error_count(&self, category: ErrorCategory) -> usize {
        self.errors.iter().filter(|e| e.category == category).count()
    }

    /// Pair every error with the knee angle at its timestamp, for chart overlays.
    pub fn error_markers(&self) -> Vec<ErrorMarker> {
        self.errors
            .iter()
            .map(|event| ErrorMarker {
                t: event.t,
                category: event.category,
                knee_angle: self.knee_angle_at(event.t),
            })
            .collect()
    }

    /// Linear interpolation over the angle history, clamped at both ends.
    pub fn knee_angle_at(&self, t: f64) -> Option<f32> {
        let first = self.angles.first()?;
        let last = self.angles.last()?;
        if t <= first.t {
            return Some(first.knee_angle);
        }
        if t >= last.t {
            return Some(last.knee_angle);
        }
        let after = self.angles.partition_point(|s| s.t <= t);
        let (a, b) = (self.angles[after - 1], self.angles[after]);
        let span = b.t - a.t;
        if span <= 0.0 {
            return Some(b.knee_angle);
        }
        let w = ((t - a.t) / span) as f32;
        Some(a.knee_angle + (b.knee_angle - a.knee_angle) * w)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize session report")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("parse session report")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> SessionReport {
        SessionReport::new(
            vec![
                AngleSample { t: 0.0, knee_angle: 170.0 },
                AngleSample { t: 1.0, knee_angle: 130.0 },
                AngleSample { t: 2.0, knee_angle: 90.0 },
            ],
            vec![
                ErrorEvent { t: 1.5, category: ErrorCategory::Torso },
                ErrorEvent { t: 3.0, category: ErrorCategory::Valgus },
            ],
            1,
        )
    }

    #[test]
    fn markers_interpolate_knee_angle() {
        let markers = report().error_markers();
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].category, ErrorCategory::Torso);
        assert_eq!(markers[0].knee_angle, Some(110.0));
        // Past the last sample the final angle is held.
        assert_eq!(markers[1].knee_angle, Some(90.0));
    }

    #[test]
    fn markers_without_angles_have_no_position() {
        let report = SessionReport::new(
            Vec::new(),
            vec![ErrorEvent { t: 0.2, category: ErrorCategory::KneeForward }],
            0,
        );
        assert_eq!(report.error_markers()[0].knee_angle, None);
    }

    #[test]
    fn report_survives_json() -> Result<()> {
        let original = report();
        let json = original.to_json()?;
        assert!(json.contains("Torso Inclination"));
        let parsed = SessionReport::from_json(&json)?;
        assert_eq!(parsed, original);
        assert_eq!(parsed.duration(), 3.0);
        assert_eq!(parsed.error_count(ErrorCategory::Valgus), 1);
        Ok(())
    }
}
