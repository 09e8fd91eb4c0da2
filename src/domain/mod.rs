//! Fit domains and the values measured on them
//!
//! A [`Domain1D`] holds the x points of one dataset that fall inside the fit
//! range. Several domains are concatenated into a [`JointDomain`], and
//! [`FitData`] pairs the joint domain with observed values, weights and the
//! list of points that take part in the cost (those not excluded).

mod joint;

pub use joint::JointDomain;

use crate::error::{FitError, Result};

/// Ordered x points of one dataset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Domain1D {
    x: Vec<f64>,
}

impl Domain1D {
    pub fn new(x: Vec<f64>) -> Self {
        Self { x }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }
}

/// Closed x intervals removed from the fit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExcludeRanges {
    ranges: Vec<(f64, f64)>,
}

impl ExcludeRanges {
    /// Build from a flat list of pairs `[a1, b1, a2, b2, ...]`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fitcore_rs::domain::ExcludeRanges;
    ///
    /// let exclude = ExcludeRanges::from_pairs(&[1.0, 2.0, 5.0, 4.0]).unwrap();
    /// assert!(exclude.contains(1.5));
    /// assert!(exclude.contains(4.5));
    /// assert!(!exclude.contains(3.0));
    /// assert!(ExcludeRanges::from_pairs(&[1.0]).is_err());
    /// ```
    pub fn from_pairs(values: &[f64]) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(FitError::InvalidInput(format!(
                "Exclude needs an even number of values, got {}",
                values.len()
            )));
        }
        let ranges = values
            .chunks_exact(2)
            .map(|pair| (pair[0].min(pair[1]), pair[0].max(pair[1])))
            .collect();
        Ok(Self { ranges })
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, x: f64) -> bool {
        self.ranges.iter().any(|&(a, b)| x >= a && x <= b)
    }
}

/// Which part of a dataset takes part in a fit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitWindow {
    pub start_x: Option<f64>,
    pub end_x: Option<f64>,
    pub exclude: ExcludeRanges,
}

impl FitWindow {
    fn in_range(&self, x: f64) -> bool {
        let (lo, hi) = match (self.start_x, self.end_x) {
            (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
            bounds => bounds,
        };
        lo.map_or(true, |lo| x >= lo) && hi.map_or(true, |hi| x <= hi)
    }
}

/// Observed values, their errors and weights, and the model values on a
/// joint domain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Values {
    observed: Vec<f64>,
    errors: Vec<f64>,
    weights: Vec<f64>,
    calculated: Vec<f64>,
}

impl Values {
    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    pub fn observed(&self) -> &[f64] {
        &self.observed
    }

    /// Observed errors as given, including ones unusable as weights.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Weights `1/sigma`; a non-positive or non-finite sigma gives weight 1.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn calculated(&self) -> &[f64] {
        &self.calculated
    }

    pub fn calculated_mut(&mut self) -> &mut [f64] {
        &mut self.calculated
    }
}

/// Data bound to a fit: joint domain, values and the active point list.
#[derive(Debug, Clone, Default)]
pub struct FitData {
    domain: JointDomain,
    values: Values,
    active: Vec<usize>,
}

impl FitData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one dataset.
    ///
    /// Points outside the window's x range are dropped. Points inside an
    /// excluded range, or with a non-finite observation, stay in the domain
    /// (the model is still evaluated there) but are left out of the cost.
    ///
    /// # Returns
    ///
    /// An error if the arrays differ in length or no point lies in range
    pub fn add_dataset(&mut self, x: &[f64], y: &[f64], e: &[f64], window: &FitWindow) -> Result<()> {
        if x.len() != y.len() || y.len() != e.len() {
            return Err(FitError::DimensionMismatch(format!(
                "x, y and e lengths differ: {}, {}, {}",
                x.len(),
                y.len(),
                e.len()
            )));
        }

        let offset = self.domain.len();
        let mut points = Vec::new();
        for i in 0..x.len() {
            if !window.in_range(x[i]) {
                continue;
            }
            let global = offset + points.len();
            points.push(x[i]);
            self.values.observed.push(y[i]);
            self.values.errors.push(e[i]);
            self.values.weights.push(if e[i].is_finite() && e[i] > 0.0 {
                1.0 / e[i]
            } else {
                1.0
            });
            self.values.calculated.push(0.0);
            if y[i].is_finite() && !window.exclude.contains(x[i]) {
                self.active.push(global);
            }
        }

        if points.is_empty() {
            return Err(FitError::NoDataPoints(format!(
                "dataset {} has no points in the fit range",
                self.domain.n_domains()
            )));
        }
        self.domain.push(Domain1D::new(points));
        Ok(())
    }

    /// Fails with `NoDataPoints` when every point has been excluded.
    pub fn ensure_active(&self) -> Result<()> {
        if self.active.is_empty() {
            Err(FitError::NoDataPoints(
                "all points are excluded from the fit".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn domain(&self) -> &JointDomain {
        &self.domain
    }

    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Values {
        &mut self.values
    }

    /// Global indices of the points that enter the cost.
    pub fn active(&self) -> &[usize] {
        &self.active
    }

    pub fn n_active(&self) -> usize {
        self.active.len()
    }
}
