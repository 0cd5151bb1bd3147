//! Evenly spaced state grid shared by the resampled ODE solution and the generator matrices.

use serde::{Deserialize, Serialize};

use crate::error::{RobustError, Result};

/// An evenly spaced grid `[center - w, center + w]` that contains `center` exactly.
///
/// The relative-entropy system is pinned at the long-run mean, so the grid is
/// generated from integer offsets around it rather than by accumulating steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateGrid {
    points: Vec<f64>,
    spacing: f64,
    center_index: usize,
}

impl StateGrid {
    /// Builds a grid around `center` whose half-width is an integer multiple of `spacing`.
    pub fn symmetric(center: f64, half_width: f64, spacing: f64) -> Result<Self> {
        if !(spacing > 0.0 && spacing.is_finite()) {
            return Err(RobustError::invalid("grid spacing", spacing));
        }
        if !(half_width > 0.0 && half_width.is_finite()) {
            return Err(RobustError::invalid("grid half-width", half_width));
        }
        let steps = (half_width / spacing).round();
        if steps < 2.0 || (steps * spacing - half_width).abs() > 1e-9 * half_width {
            return Err(RobustError::invalid("grid spacing", spacing));
        }

        let steps = steps as i64;
        let points = (-steps..=steps)
            .map(|offset| {
                if offset == 0 {
                    center
                } else {
                    center + offset as f64 * spacing
                }
            })
            .collect();

        Ok(Self {
            points,
            spacing,
            center_index: steps as usize,
        })
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Distance between neighbouring points.
    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    /// Grid points in increasing order.
    pub fn points(&self) -> &[f64] {
        &self.points
    }

    /// Index of the centre point (the long-run mean and the kink).
    pub fn center_index(&self) -> usize {
        self.center_index
    }

    pub fn center(&self) -> f64 {
        self.points[self.center_index]
    }

    pub fn lower(&self) -> f64 {
        self.points[0]
    }

    pub fn upper(&self) -> f64 {
        self.points[self.points.len() - 1]
    }

    /// Points of the left half-line, centre included.
    pub fn negative_half(&self) -> &[f64] {
        &self.points[..=self.center_index]
    }

    /// Points of the right half-line, centre included.
    pub fn positive_half(&self) -> &[f64] {
        &self.points[self.center_index..]
    }

    /// Returns the cell `(i, w)` such that `z = (1 - w) x_i + w x_{i+1}`.
    pub fn locate(&self, z: f64) -> Result<(usize, f64)> {
        let (lower, upper) = (self.lower(), self.upper());
        if !(z >= lower && z <= upper) {
            return Err(RobustError::OffGrid {
                state: z,
                lower,
                upper,
            });
        }
        let last_cell = self.points.len() - 2;
        let cell = (((z - lower) / self.spacing).floor() as usize).min(last_cell);
        let weight = (z - self.points[cell]) / (self.points[cell + 1] - self.points[cell]);
        Ok((cell, weight))
    }
}
