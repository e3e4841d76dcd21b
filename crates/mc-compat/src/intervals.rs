//! Confidence-interval propagation.
//!
//! Computes per-point confidence bands for a fitted model and writes
//! them into an externally supplied container. The half-width itself is
//! delegated to the engine's result object (covariance propagation);
//! this module owns the container compatibility rules and the
//! write-back.
//!
//! The intervals are approximate for models nonlinear in their
//! parameters: the propagation linearizes the model around the fitted
//! values.

use crate::containers::FitData;
use crate::error::{CompatError, CompatResult};
use mc_core::ModelFunction;
use mc_engine::FitResult;

/// Allowed source-dimensionality → target-variant combinations:
///
/// | fitted data | band target |
/// |---|---|
/// | 1-D (point set or binned) | `PointSet1D` or `Binned1D` |
/// | 2-D (point set or binned) | `PointSet2D` or `Binned2D` |
/// | 3-D (binned) | `Binned3D` |
fn check_target(dim: usize, target: &FitData) -> CompatResult<()> {
    let ok = matches!(
        (dim, target),
        (1, FitData::PointSet1D { .. })
            | (1, FitData::Binned1D { .. })
            | (2, FitData::PointSet2D { .. })
            | (2, FitData::Binned2D { .. })
            | (3, FitData::Binned3D { .. })
    );
    if ok {
        Ok(())
    } else {
        Err(CompatError::TypeMismatch(format!(
            "cannot store {dim}-dimensional confidence bands in a {}-dimensional container",
            target.dimension()
        )))
    }
}

/// Compute confidence bands for `source` (the originally fitted data)
/// and write them into `target`: per point, the model value at the
/// fitted parameters and the half-width at confidence level `cl`.
///
/// Fails with no mutation when the result is invalid or the target
/// variant is incompatible with the source dimensionality.
pub fn compute_intervals(
    result: &FitResult,
    model: &dyn ModelFunction,
    source: &FitData,
    target: &mut FitData,
    cl: f64,
) -> CompatResult<()> {
    if !result.is_valid() {
        return Err(CompatError::InvalidResult(
            "cannot compute confidence intervals without a valid fit result".to_string(),
        ));
    }

    let dim = source.dimension();
    check_target(dim, target)?;

    let points = source.points();

    // Evaluate everything before touching the target, so a failed
    // propagation cannot leave it partially updated.
    let widths = result.confidence_half_widths(model, &points, cl)?;
    let params = result.parameters();
    let values: Vec<f64> = points.iter().map(|x| model.eval(x, params)).collect();

    let mut skipped = 0usize;
    for (i, x) in points.iter().enumerate() {
        if !target.set_band_point(i, x, values[i], widths[i])? {
            skipped += 1;
        }
    }
    if skipped > 0 {
        log::warn!("confidence bands: {skipped} point(s) outside the target axes were skipped");
    }
    Ok(())
}

/// Confidence half-widths at explicit coordinates, mirroring the legacy
/// `(n, ndim, x, ci, cl)` entry point.
pub fn compute_intervals_at(
    result: &FitResult,
    model: &dyn ModelFunction,
    points: &[Vec<f64>],
    cl: f64,
) -> CompatResult<Vec<f64>> {
    if !result.is_valid() {
        return Err(CompatError::InvalidResult(
            "cannot compute confidence intervals without a valid fit result".to_string(),
        ));
    }
    Ok(result.confidence_half_widths(model, points, cl)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcn::LegacyFcnAdapter;
    use mc_engine::config::ParameterSettings;
    use mc_engine::Fitter;

    fn line_model() -> impl ModelFunction {
        (1usize, 2usize, |x: &[f64], p: &[f64]| p[0] + p[1] * x[0])
    }

    /// Fit y = a + b·x to exact data so the result is valid with a
    /// well-defined covariance.
    fn fitted_line() -> Fitter {
        let xs: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| 1.0 + 2.0 * x).collect();

        let mut adapter = LegacyFcnAdapter::new(Box::new(move |_n, _g, fval, p, _flag| {
            *fval = xs
                .iter()
                .zip(ys.iter())
                .map(|(&x, &y)| {
                    let r = y - (p[0] + p[1] * x);
                    r * r
                })
                .sum();
        }));
        adapter.set_dimension(2);

        let mut fitter = Fitter::new();
        fitter.config_mut().params_mut().push(ParameterSettings::new("a", 0.0, 0.1));
        fitter.config_mut().params_mut().push(ParameterSettings::new("b", 0.0, 0.1));
        fitter.fit_fcn(&adapter).unwrap();
        assert!(fitter.result().is_valid());
        fitter
    }

    fn source_points() -> FitData {
        FitData::PointSet1D {
            x: vec![0.0, 1.0, 2.0, 3.0],
            y: vec![1.0, 3.0, 5.0, 7.0],
            y_err: vec![1.0; 4],
        }
    }

    #[test]
    fn test_invalid_result_mutates_nothing() {
        let result = FitResult::empty();
        let mut target = FitData::empty_binned_1d(vec![0.0, 1.0, 2.0]).unwrap();
        let before = target.clone();
        let err =
            compute_intervals(&result, &line_model(), &source_points(), &mut target, 0.95);
        assert!(matches!(err, Err(CompatError::InvalidResult(_))));
        match (&target, &before) {
            (
                FitData::Binned1D { content: a, error: ea, .. },
                FitData::Binned1D { content: b, error: eb, .. },
            ) => {
                assert_eq!(a, b);
                assert_eq!(ea, eb);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let fitter = fitted_line();
        let mut target = FitData::Binned2D {
            x_edges: vec![0.0, 1.0],
            y_edges: vec![0.0, 1.0],
            content: vec![0.0],
            error: vec![0.0],
        };
        let err = compute_intervals(
            fitter.result(),
            &line_model(),
            &source_points(),
            &mut target,
            0.95,
        );
        assert!(matches!(err, Err(CompatError::TypeMismatch(_))));
    }

    #[test]
    fn test_zero_confidence_level_zero_widths() {
        let fitter = fitted_line();
        let mut target = FitData::empty_point_set_1d();
        compute_intervals(fitter.result(), &line_model(), &source_points(), &mut target, 0.0)
            .unwrap();
        match &target {
            FitData::PointSet1D { y_err, .. } => {
                assert!(y_err.iter().all(|&w| w == 0.0));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_band_written_into_point_set() {
        let fitter = fitted_line();
        let mut target = FitData::empty_point_set_1d();
        compute_intervals(fitter.result(), &line_model(), &source_points(), &mut target, 0.95)
            .unwrap();
        match &target {
            FitData::PointSet1D { x, y, y_err } => {
                assert_eq!(x.len(), 4);
                // Model values at the fitted parameters (~ exact line).
                for (i, &xi) in x.iter().enumerate() {
                    assert!((y[i] - (1.0 + 2.0 * xi)).abs() < 1e-3);
                    assert!(y_err[i] > 0.0);
                }
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_band_written_into_binned_target() {
        let fitter = fitted_line();
        // Bins centered at the source points 0, 1, 2, 3.
        let mut target =
            FitData::empty_binned_1d(vec![-0.5, 0.5, 1.5, 2.5, 3.5]).unwrap();
        compute_intervals(fitter.result(), &line_model(), &source_points(), &mut target, 0.68)
            .unwrap();
        match &target {
            FitData::Binned1D { content, error, .. } => {
                for (b, &c) in content.iter().enumerate() {
                    assert!((c - (1.0 + 2.0 * b as f64)).abs() < 1e-3);
                    assert!(error[b] > 0.0);
                }
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_raw_array_variant() {
        let fitter = fitted_line();
        let pts = vec![vec![0.0], vec![2.0]];
        let widths =
            compute_intervals_at(fitter.result(), &line_model(), &pts, 0.95).unwrap();
        assert_eq!(widths.len(), 2);
        assert!(widths.iter().all(|&w| w > 0.0));
    }
}
