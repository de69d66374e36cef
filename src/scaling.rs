//! Column standardization (zero mean, unit variance)

use crate::error::SegmentError;
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use tracing::debug;

/// Per-column statistics learned by [`StandardScaler::fit`]
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerParams {
    pub mean: Array1<f64>,
    /// Population standard deviation; exactly 0.0 for constant columns
    pub std: Array1<f64>,
}

/// Standardizes features by removing the mean and scaling to unit variance
///
/// Constant columns are mapped to all zeros instead of dividing by zero.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    params: ScalerParams,
}

impl StandardScaler {
    /// Learn column means and standard deviations from `data`
    pub fn fit(data: &Array2<f64>) -> Result<Self, SegmentError> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(SegmentError::InvalidConfig(
                "cannot fit a scaler on an empty matrix".to_string(),
            ));
        }

        let n = data.nrows() as f64;
        let mut mean = Array1::zeros(data.ncols());
        let mut std = Array1::zeros(data.ncols());

        for (j, column) in data.axis_iter(Axis(1)).enumerate() {
            let m = column.sum() / n;
            mean[j] = m;
            if is_constant(&column) {
                debug!("Column {} has zero variance; it will be scaled to zeros", j);
                continue;
            }
            let variance = column.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
            std[j] = variance.sqrt();
        }

        Ok(Self {
            params: ScalerParams { mean, std },
        })
    }

    /// Rebuild a scaler from previously fitted parameters
    pub fn from_params(params: ScalerParams) -> Result<Self, SegmentError> {
        if params.mean.len() != params.std.len() {
            return Err(SegmentError::DimensionMismatch {
                expected: params.mean.len(),
                found: params.std.len(),
            });
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &ScalerParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.params.mean.len()
    }

    /// Scale `data` with the fitted statistics
    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>, SegmentError> {
        self.check_columns(data.ncols())?;
        let mut scaled = data.clone();
        for mut row in scaled.outer_iter_mut() {
            Zip::from(&mut row)
                .and(&self.params.mean)
                .and(&self.params.std)
                .for_each(|v, &m, &s| *v = if s > 0.0 { (*v - m) / s } else { 0.0 });
        }
        Ok(scaled)
    }

    /// Scale a single observation
    pub fn transform_row(&self, row: &[f64]) -> Result<Array1<f64>, SegmentError> {
        self.check_columns(row.len())?;
        let input = Array2::from_shape_vec((1, row.len()), row.to_vec())
            .map_err(|e| SegmentError::InvalidConfig(e.to_string()))?;
        Ok(self.transform(&input)?.row(0).to_owned())
    }

    /// Undo [`transform`](Self::transform)
    pub fn inverse_transform(&self, scaled: &Array2<f64>) -> Result<Array2<f64>, SegmentError> {
        self.check_columns(scaled.ncols())?;
        let mut original = scaled.clone();
        for mut row in original.outer_iter_mut() {
            Zip::from(&mut row)
                .and(&self.params.mean)
                .and(&self.params.std)
                .for_each(|v, &m, &s| *v = *v * s + m);
        }
        Ok(original)
    }

    fn check_columns(&self, found: usize) -> Result<(), SegmentError> {
        if found != self.n_features() {
            return Err(SegmentError::DimensionMismatch {
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }
}

/// Fit a scaler on `data` and return the scaled matrix with its parameters
pub fn fit_transform(data: &Array2<f64>) -> Result<(Array2<f64>, ScalerParams), SegmentError> {
    let scaler = StandardScaler::fit(data)?;
    let scaled = scaler.transform(data)?;
    Ok((scaled, scaler.params))
}

fn is_constant(column: &ArrayView1<f64>) -> bool {
    let mut values = column.iter();
    match values.next() {
        Some(first) => values.all(|v| v == first),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_fit_transform_zero_mean_unit_variance() {
        let data = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let (scaled, params) = fit_transform(&data).unwrap();

        assert!((params.mean[0] - 2.5).abs() < 1e-12);
        assert!((params.std[0] - 1.25f64.sqrt()).abs() < 1e-12);

        for column in scaled.axis_iter(Axis(1)) {
            let mean = column.sum() / column.len() as f64;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / column.len() as f64;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_variance_column_becomes_zeros() {
        let data = array![[0.1, 1.0], [0.1, 2.0], [0.1, 3.0]];
        let (scaled, params) = fit_transform(&data).unwrap();

        assert_eq!(params.std[0], 0.0);
        assert!(scaled.column(0).iter().all(|&v| v == 0.0));
        assert!(scaled.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_params_are_reusable() {
        let train = array![[0.0, 100.0], [10.0, 300.0]];
        let scaler = StandardScaler::fit(&train).unwrap();
        let rebuilt = StandardScaler::from_params(scaler.params().clone()).unwrap();

        let scaled = rebuilt.transform_row(&[5.0, 500.0]).unwrap();
        assert!((scaled[0] - 0.0).abs() < 1e-12);
        assert!((scaled[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_mismatch() {
        let scaler = StandardScaler::fit(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        let result = scaler.transform(&array![[1.0, 2.0, 3.0]]);
        assert_eq!(
            result.unwrap_err(),
            SegmentError::DimensionMismatch { expected: 2, found: 3 }
        );
        assert!(scaler.transform_row(&[1.0]).is_err());
    }

    #[test]
    fn test_empty_matrix_is_rejected() {
        let empty = Array2::<f64>::zeros((0, 3));
        assert!(StandardScaler::fit(&empty).is_err());
    }

    proptest! {
        #[test]
        fn prop_inverse_transform_round_trip(
            rows in prop::collection::vec(prop::collection::vec(-1.0e4f64..1.0e4, 3), 1..40)
        ) {
            let n = rows.len();
            let data = Array2::from_shape_vec((n, 3), rows.concat()).unwrap();
            let scaler = StandardScaler::fit(&data).unwrap();
            let scaled = scaler.transform(&data).unwrap();
            let restored = scaler.inverse_transform(&scaled).unwrap();

            prop_assert!(scaled.iter().all(|v| v.is_finite()));
            for (a, b) in data.iter().zip(restored.iter()) {
                prop_assert!((a - b).abs() <= 1e-6 * a.abs().max(1.0));
            }
        }
    }
}
