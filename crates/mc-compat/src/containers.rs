//! Tagged data containers.
//!
//! A closed set of container variants carrying their own dimensionality
//! as data: compatibility decisions are made by matching on the variant,
//! never by runtime type queries. Binned variants follow the usual
//! layout of `n + 1` edges for `n` bins; multi-dimensional contents are
//! flattened x-major (`ix` varies slowest).

use crate::error::{CompatError, CompatResult};
use serde::{Deserialize, Serialize};

/// A fit data container: scatter points with errors, or binned contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FitData {
    /// 1-D point set with errors on the dependent value.
    PointSet1D {
        /// Abscissae.
        x: Vec<f64>,
        /// Dependent values.
        y: Vec<f64>,
        /// Errors on `y`.
        y_err: Vec<f64>,
    },
    /// 2-D point set with errors on the dependent value.
    PointSet2D {
        /// First coordinates.
        x: Vec<f64>,
        /// Second coordinates.
        y: Vec<f64>,
        /// Dependent values.
        z: Vec<f64>,
        /// Errors on `z`.
        z_err: Vec<f64>,
    },
    /// 1-D binned container.
    Binned1D {
        /// Bin edges (length = bins + 1).
        edges: Vec<f64>,
        /// Bin contents.
        content: Vec<f64>,
        /// Bin errors.
        error: Vec<f64>,
    },
    /// 2-D binned container, contents flattened x-major.
    Binned2D {
        /// Bin edges along x.
        x_edges: Vec<f64>,
        /// Bin edges along y.
        y_edges: Vec<f64>,
        /// Bin contents, `[ix * ny + iy]`.
        content: Vec<f64>,
        /// Bin errors, same layout.
        error: Vec<f64>,
    },
    /// 3-D binned container, contents flattened x-major.
    Binned3D {
        /// Bin edges along x.
        x_edges: Vec<f64>,
        /// Bin edges along y.
        y_edges: Vec<f64>,
        /// Bin edges along z.
        z_edges: Vec<f64>,
        /// Bin contents, `[(ix * ny + iy) * nz + iz]`.
        content: Vec<f64>,
        /// Bin errors, same layout.
        error: Vec<f64>,
    },
}

/// Locate the bin containing `x`. Left-closed, right-open; the last
/// edge belongs to the last bin. `None` outside the axis range.
fn axis_bin(edges: &[f64], x: f64) -> Option<usize> {
    let n_bins = edges.len().checked_sub(1)?;
    if n_bins == 0 || x < edges[0] || x > edges[n_bins] {
        return None;
    }
    if x == edges[n_bins] {
        return Some(n_bins - 1);
    }
    Some(edges.partition_point(|&e| e <= x) - 1)
}

fn bin_centers(edges: &[f64]) -> Vec<f64> {
    edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
}

fn check_edges(edges: &[f64], axis: &str) -> CompatResult<usize> {
    if edges.len() < 2 {
        return Err(CompatError::Argument(format!("{axis} axis needs at least 2 bin edges")));
    }
    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(CompatError::Argument(format!("{axis} axis edges must be strictly increasing")));
    }
    Ok(edges.len() - 1)
}

impl FitData {
    /// Data dimensionality (1, 2 or 3), carried by the variant.
    pub fn dimension(&self) -> usize {
        match self {
            Self::PointSet1D { .. } | Self::Binned1D { .. } => 1,
            Self::PointSet2D { .. } | Self::Binned2D { .. } => 2,
            Self::Binned3D { .. } => 3,
        }
    }

    /// Number of points (bins for binned variants).
    pub fn n_points(&self) -> usize {
        match self {
            Self::PointSet1D { x, .. } => x.len(),
            Self::PointSet2D { x, .. } => x.len(),
            Self::Binned1D { content, .. } => content.len(),
            Self::Binned2D { content, .. } => content.len(),
            Self::Binned3D { content, .. } => content.len(),
        }
    }

    /// Validate internal consistency (edge ordering, matching lengths).
    pub fn validate(&self) -> CompatResult<()> {
        match self {
            Self::PointSet1D { x, y, y_err } => {
                if x.len() != y.len() || x.len() != y_err.len() {
                    return Err(CompatError::Argument(
                        "point set arrays must have equal length".to_string(),
                    ));
                }
            }
            Self::PointSet2D { x, y, z, z_err } => {
                if x.len() != y.len() || x.len() != z.len() || x.len() != z_err.len() {
                    return Err(CompatError::Argument(
                        "point set arrays must have equal length".to_string(),
                    ));
                }
            }
            Self::Binned1D { edges, content, error } => {
                let n = check_edges(edges, "x")?;
                if content.len() != n || error.len() != n {
                    return Err(CompatError::Argument(format!(
                        "binned container expects {n} contents/errors"
                    )));
                }
            }
            Self::Binned2D { x_edges, y_edges, content, error } => {
                let n = check_edges(x_edges, "x")? * check_edges(y_edges, "y")?;
                if content.len() != n || error.len() != n {
                    return Err(CompatError::Argument(format!(
                        "binned container expects {n} contents/errors"
                    )));
                }
            }
            Self::Binned3D { x_edges, y_edges, z_edges, content, error } => {
                let n = check_edges(x_edges, "x")?
                    * check_edges(y_edges, "y")?
                    * check_edges(z_edges, "z")?;
                if content.len() != n || error.len() != n {
                    return Err(CompatError::Argument(format!(
                        "binned container expects {n} contents/errors"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Evaluation coordinates: stored points for point sets, bin centers
    /// for binned variants (in content order).
    pub fn points(&self) -> Vec<Vec<f64>> {
        match self {
            Self::PointSet1D { x, .. } => x.iter().map(|&v| vec![v]).collect(),
            Self::PointSet2D { x, y, .. } => {
                x.iter().zip(y.iter()).map(|(&a, &b)| vec![a, b]).collect()
            }
            Self::Binned1D { edges, .. } => {
                bin_centers(edges).into_iter().map(|c| vec![c]).collect()
            }
            Self::Binned2D { x_edges, y_edges, .. } => {
                let cx = bin_centers(x_edges);
                let cy = bin_centers(y_edges);
                let mut pts = Vec::with_capacity(cx.len() * cy.len());
                for &a in &cx {
                    for &b in &cy {
                        pts.push(vec![a, b]);
                    }
                }
                pts
            }
            Self::Binned3D { x_edges, y_edges, z_edges, .. } => {
                let cx = bin_centers(x_edges);
                let cy = bin_centers(y_edges);
                let cz = bin_centers(z_edges);
                let mut pts = Vec::with_capacity(cx.len() * cy.len() * cz.len());
                for &a in &cx {
                    for &b in &cy {
                        for &c in &cz {
                            pts.push(vec![a, b, c]);
                        }
                    }
                }
                pts
            }
        }
    }

    /// Observed dependent values in point/content order.
    pub fn values(&self) -> &[f64] {
        match self {
            Self::PointSet1D { y, .. } => y,
            Self::PointSet2D { z, .. } => z,
            Self::Binned1D { content, .. } => content,
            Self::Binned2D { content, .. } => content,
            Self::Binned3D { content, .. } => content,
        }
    }

    /// Errors on the dependent values, same order as [`values`](Self::values).
    pub fn value_errors(&self) -> &[f64] {
        match self {
            Self::PointSet1D { y_err, .. } => y_err,
            Self::PointSet2D { z_err, .. } => z_err,
            Self::Binned1D { error, .. } => error,
            Self::Binned2D { error, .. } => error,
            Self::Binned3D { error, .. } => error,
        }
    }

    /// An all-zero band target with this container's shape: same edges
    /// for binned variants, an empty point set otherwise.
    pub fn band_target(&self) -> Self {
        match self {
            Self::PointSet1D { .. } => Self::empty_point_set_1d(),
            Self::PointSet2D { .. } => {
                Self::PointSet2D { x: Vec::new(), y: Vec::new(), z: Vec::new(), z_err: Vec::new() }
            }
            Self::Binned1D { edges, content, .. } => Self::Binned1D {
                edges: edges.clone(),
                content: vec![0.0; content.len()],
                error: vec![0.0; content.len()],
            },
            Self::Binned2D { x_edges, y_edges, content, .. } => Self::Binned2D {
                x_edges: x_edges.clone(),
                y_edges: y_edges.clone(),
                content: vec![0.0; content.len()],
                error: vec![0.0; content.len()],
            },
            Self::Binned3D { x_edges, y_edges, z_edges, content, .. } => Self::Binned3D {
                x_edges: x_edges.clone(),
                y_edges: y_edges.clone(),
                z_edges: z_edges.clone(),
                content: vec![0.0; content.len()],
                error: vec![0.0; content.len()],
            },
        }
    }

    /// Store a band point: value and half-width at `coords`.
    ///
    /// Point sets are written at `index` (growing if needed, like the
    /// legacy graph SetPoint); binned variants locate the bin containing
    /// `coords`. Returns `Ok(false)` when the coordinates fall outside a
    /// binned axis range (the point is skipped).
    pub fn set_band_point(
        &mut self,
        index: usize,
        coords: &[f64],
        value: f64,
        half_width: f64,
    ) -> CompatResult<bool> {
        if coords.len() != self.dimension() {
            return Err(CompatError::Argument(format!(
                "expected {}-dimensional coordinates, got {}",
                self.dimension(),
                coords.len()
            )));
        }
        match self {
            Self::PointSet1D { x, y, y_err } => {
                grow(x, index);
                grow(y, index);
                grow(y_err, index);
                x[index] = coords[0];
                y[index] = value;
                y_err[index] = half_width;
                Ok(true)
            }
            Self::PointSet2D { x, y, z, z_err } => {
                grow(x, index);
                grow(y, index);
                grow(z, index);
                grow(z_err, index);
                x[index] = coords[0];
                y[index] = coords[1];
                z[index] = value;
                z_err[index] = half_width;
                Ok(true)
            }
            Self::Binned1D { edges, content, error } => {
                match axis_bin(edges, coords[0]) {
                    Some(b) => {
                        content[b] = value;
                        error[b] = half_width;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            Self::Binned2D { x_edges, y_edges, content, error } => {
                let ny = y_edges.len() - 1;
                match (axis_bin(x_edges, coords[0]), axis_bin(y_edges, coords[1])) {
                    (Some(bx), Some(by)) => {
                        let idx = bx * ny + by;
                        content[idx] = value;
                        error[idx] = half_width;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
            Self::Binned3D { x_edges, y_edges, z_edges, content, error } => {
                let ny = y_edges.len() - 1;
                let nz = z_edges.len() - 1;
                match (
                    axis_bin(x_edges, coords[0]),
                    axis_bin(y_edges, coords[1]),
                    axis_bin(z_edges, coords[2]),
                ) {
                    (Some(bx), Some(by), Some(bz)) => {
                        let idx = (bx * ny + by) * nz + bz;
                        content[idx] = value;
                        error[idx] = half_width;
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
        }
    }

    /// An all-zero 1-D binned container over the given edges.
    pub fn empty_binned_1d(edges: Vec<f64>) -> CompatResult<Self> {
        let n = check_edges(&edges, "x")?;
        Ok(Self::Binned1D { edges, content: vec![0.0; n], error: vec![0.0; n] })
    }

    /// An empty 1-D point set.
    pub fn empty_point_set_1d() -> Self {
        Self::PointSet1D { x: Vec::new(), y: Vec::new(), y_err: Vec::new() }
    }
}

fn grow(v: &mut Vec<f64>, index: usize) {
    if index >= v.len() {
        v.resize(index + 1, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_bin_conventions() {
        let edges = [0.0, 1.0, 2.0, 3.0];
        assert_eq!(axis_bin(&edges, -0.1), None);
        assert_eq!(axis_bin(&edges, 0.0), Some(0));
        assert_eq!(axis_bin(&edges, 0.999), Some(0));
        assert_eq!(axis_bin(&edges, 1.0), Some(1));
        // The last edge belongs to the last bin.
        assert_eq!(axis_bin(&edges, 3.0), Some(2));
        assert_eq!(axis_bin(&edges, 3.1), None);
    }

    #[test]
    fn test_binned_points_are_centers() {
        let h = FitData::Binned1D {
            edges: vec![0.0, 2.0, 4.0],
            content: vec![1.0, 2.0],
            error: vec![0.0, 0.0],
        };
        assert_eq!(h.dimension(), 1);
        assert_eq!(h.points(), vec![vec![1.0], vec![3.0]]);
    }

    #[test]
    fn test_2d_layout_round_trip() {
        let mut h = FitData::Binned2D {
            x_edges: vec![0.0, 1.0, 2.0],
            y_edges: vec![0.0, 1.0, 2.0, 3.0],
            content: vec![0.0; 6],
            error: vec![0.0; 6],
        };
        assert!(h.validate().is_ok());
        // Bin (ix=1, iy=2) is index 1*3 + 2 = 5.
        assert!(h.set_band_point(0, &[1.5, 2.5], 7.0, 0.5).unwrap());
        match &h {
            FitData::Binned2D { content, error, .. } => {
                assert_eq!(content[5], 7.0);
                assert_eq!(error[5], 0.5);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_out_of_range_point_is_skipped() {
        let mut h = FitData::empty_binned_1d(vec![0.0, 1.0]).unwrap();
        assert!(!h.set_band_point(0, &[5.0], 1.0, 0.1).unwrap());
        match &h {
            FitData::Binned1D { content, .. } => assert_eq!(content[0], 0.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_point_set_grows_like_legacy_graphs() {
        let mut g = FitData::empty_point_set_1d();
        g.set_band_point(2, &[1.0], 2.0, 0.2).unwrap();
        match &g {
            FitData::PointSet1D { x, y, y_err } => {
                assert_eq!(x.len(), 3);
                assert_eq!(y[2], 2.0);
                assert_eq!(y_err[2], 0.2);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_validate_rejects_bad_edges() {
        let h = FitData::Binned1D {
            edges: vec![0.0, 0.0, 1.0],
            content: vec![0.0; 2],
            error: vec![0.0; 2],
        };
        assert!(h.validate().is_err());
    }
}
