use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// How raw features are rescaled before distances are computed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationScheme {
    /// `(v - min) / (max - min)`; parameters are stored as `[max, min]`.
    #[default]
    MinMax,
    /// `(v - mean) / std`; parameters are stored as `[mean, std]`.
    ZScore,
}

impl NormalizationScheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MinMax => "minmax",
            Self::ZScore => "zscore",
        }
    }
}

impl std::str::FromStr for NormalizationScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "minmax" | "min-max" => Ok(Self::MinMax),
            "zscore" | "z-score" => Ok(Self::ZScore),
            other => Err(format!("unknown normalization scheme '{other}'")),
        }
    }
}

/// Per-dimension parameters fitted once at build time.
///
/// `first` and `second` are rows 0 and 1 of the persisted vector array:
/// `max`/`min` for min-max, `mean`/`std` for z-score.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizationParams {
    scheme: NormalizationScheme,
    first: Array1<f32>,
    second: Array1<f32>,
}

impl NormalizationParams {
    /// Fit parameters over a corpus of raw vectors (one per row).
    pub fn fit(scheme: NormalizationScheme, vectors: ArrayView2<'_, f32>) -> Result<Self, IndexError> {
        if vectors.nrows() == 0 || vectors.ncols() == 0 {
            return Err(IndexError::Empty);
        }
        let (first, second) = match scheme {
            NormalizationScheme::MinMax => (
                vectors.fold_axis(Axis(0), f32::NEG_INFINITY, |&acc, &v| acc.max(v)),
                vectors.fold_axis(Axis(0), f32::INFINITY, |&acc, &v| acc.min(v)),
            ),
            NormalizationScheme::ZScore => {
                let mean = vectors.mean_axis(Axis(0)).ok_or(IndexError::Empty)?;
                let std = vectors.std_axis(Axis(0), 0.0);
                (mean, std)
            }
        };
        Ok(Self {
            scheme,
            first,
            second,
        })
    }

    /// Rebuild parameters from their persisted rows.
    pub fn from_rows(
        scheme: NormalizationScheme,
        first: Vec<f32>,
        second: Vec<f32>,
    ) -> Result<Self, IndexError> {
        if first.len() != second.len() {
            return Err(IndexError::DimensionMismatch {
                expected: first.len(),
                actual: second.len(),
            });
        }
        Ok(Self {
            scheme,
            first: Array1::from(first),
            second: Array1::from(second),
        })
    }

    pub fn scheme(&self) -> NormalizationScheme {
        self.scheme
    }

    pub fn dimension(&self) -> usize {
        self.first.len()
    }

    /// Row 0 of the persisted array (`max` or `mean`).
    pub fn first(&self) -> ArrayView1<'_, f32> {
        self.first.view()
    }

    /// Row 1 of the persisted array (`min` or `std`).
    pub fn second(&self) -> ArrayView1<'_, f32> {
        self.second.view()
    }

    /// Normalize one vector. Dimensions with zero range (or zero std) map to 0.
    pub fn apply(&self, vector: &[f32]) -> Result<Vec<f32>, IndexError> {
        if vector.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        Ok(vector
            .iter()
            .zip(self.first.iter().zip(self.second.iter()))
            .map(|(&v, (&a, &b))| self.scale(v, a, b))
            .collect())
    }

    /// Normalize every row of `vectors` in place.
    pub fn apply_rows(&self, vectors: &mut Array2<f32>) -> Result<(), IndexError> {
        if vectors.ncols() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: vectors.ncols(),
            });
        }
        for row in vectors.rows_mut() {
            Zip::from(row)
                .and(&self.first)
                .and(&self.second)
                .for_each(|v, &a, &b| *v = self.scale(*v, a, b));
        }
        Ok(())
    }

    fn scale(&self, value: f32, first: f32, second: f32) -> f32 {
        let (offset, span) = match self.scheme {
            NormalizationScheme::MinMax => (second, first - second),
            NormalizationScheme::ZScore => (first, second),
        };
        if span == 0.0 || !span.is_finite() {
            return 0.0;
        }
        let scaled = (value - offset) / span;
        if scaled.is_finite() { scaled } else { 0.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn min_max_maps_corpus_into_unit_range() {
        let data = array![[1.0_f32, 10.0, 5.0], [3.0, 20.0, 5.0], [2.0, 15.0, 5.0]];
        let params = NormalizationParams::fit(NormalizationScheme::MinMax, data.view()).unwrap();
        assert_eq!(params.first().to_vec(), vec![3.0, 20.0, 5.0]);
        assert_eq!(params.second().to_vec(), vec![1.0, 10.0, 5.0]);
        for row in data.rows() {
            let out = params.apply(row.as_slice().unwrap()).unwrap();
            assert!(out[..2].iter().all(|v| (0.0..=1.0).contains(v)));
            assert_eq!(out[2], 0.0);
        }
        assert_eq!(params.apply(&[2.0, 15.0, 7.0]).unwrap(), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn z_score_centers_and_scales() {
        let data = array![[1.0_f32, 4.0], [3.0, 4.0]];
        let params = NormalizationParams::fit(NormalizationScheme::ZScore, data.view()).unwrap();
        assert_eq!(params.first().to_vec(), vec![2.0, 4.0]);
        assert_eq!(params.second().to_vec(), vec![1.0, 0.0]);
        assert_eq!(params.apply(&[3.0, 9.0]).unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn apply_rows_matches_apply() {
        let mut data = array![[0.0_f32, 2.0], [4.0, 6.0], [2.0, 3.0]];
        let params = NormalizationParams::fit(NormalizationScheme::MinMax, data.view()).unwrap();
        let expected = params.apply(&[2.0, 3.0]).unwrap();
        params.apply_rows(&mut data).unwrap();
        assert_eq!(data.row(2).to_vec(), expected);
    }

    #[test]
    fn query_with_wrong_dimension_is_rejected() {
        let data = array![[0.0_f32, 1.0]];
        let params = NormalizationParams::fit(NormalizationScheme::MinMax, data.view()).unwrap();
        assert!(matches!(
            params.apply(&[1.0]),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn empty_corpus_cannot_be_fitted() {
        let data = Array2::<f32>::zeros((0, 3));
        assert!(matches!(
            NormalizationParams::fit(NormalizationScheme::MinMax, data.view()),
            Err(IndexError::Empty)
        ));
    }

    #[test]
    fn schemes_parse_and_serialize_lowercase() {
        assert_eq!("zscore".parse::<NormalizationScheme>().unwrap(), NormalizationScheme::ZScore);
        assert_eq!(serde_json::to_string(&NormalizationScheme::MinMax).unwrap(), "\"minmax\"");
    }
}
