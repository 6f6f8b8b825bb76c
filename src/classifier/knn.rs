//! k-nearest-neighbours classifier (Euclidean, uniform vote)

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{distinct_classes, Classifier};
use crate::acquisition::sampling::squared_distance;
use crate::{Error, Result};

/// Hyper-parameters of the k-NN classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KNeighborsSpec {
    /// Neighbours consulted per prediction.
    #[serde(default = "default_neighbors")]
    pub n_neighbors: usize,
}

const fn default_neighbors() -> usize {
    5
}

impl Default for KNeighborsSpec {
    fn default() -> Self {
        Self {
            n_neighbors: default_neighbors(),
        }
    }
}

/// Vote fractions among the `k` closest training points.
#[derive(Debug, Clone)]
pub struct KNeighborsClassifier {
    n_neighbors: usize,
    x_train: Array2<f64>,
    y_train: Vec<i64>,
    classes: Vec<i64>,
}

impl KNeighborsClassifier {
    /// Unfitted classifier.
    #[must_use]
    pub fn new(n_neighbors: usize) -> Self {
        Self {
            n_neighbors,
            x_train: Array2::zeros((0, 0)),
            y_train: Vec::new(),
            classes: Vec::new(),
        }
    }
}

impl Classifier for KNeighborsClassifier {
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[i64]) -> Result<()> {
        let classes = distinct_classes(x, y)?;
        if self.n_neighbors == 0 || self.n_neighbors > y.len() {
            return Err(Error::Classifier(format!(
                "n_neighbors = {} needs 1..={} training points",
                self.n_neighbors,
                y.len()
            )));
        }
        self.x_train = x.to_owned();
        self.y_train = y.to_vec();
        self.classes = classes;
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        if self.classes.is_empty() {
            return Err(Error::Classifier("KNeighborsClassifier is not fitted".to_string()));
        }
        if x.ncols() != self.x_train.ncols() {
            return Err(Error::Classifier(format!(
                "Expected {} features, got {}",
                self.x_train.ncols(),
                x.ncols()
            )));
        }

        #[allow(clippy::cast_precision_loss)]
        let weight = 1.0 / self.n_neighbors as f64;
        let mut probabilities = Array2::zeros((x.nrows(), self.classes.len()));
        for (i, row) in x.rows().into_iter().enumerate() {
            let mut order: Vec<(f64, usize)> = self
                .x_train
                .rows()
                .into_iter()
                .enumerate()
                .map(|(j, train)| (squared_distance(row, train), j))
                .collect();
            order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            for &(_, j) in order.iter().take(self.n_neighbors) {
                if let Ok(col) = self.classes.binary_search(&self.y_train[j]) {
                    probabilities[[i, col]] += weight;
                }
            }
        }
        Ok(probabilities)
    }

    fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn to_json(&self) -> Result<Value> {
        let rows: Vec<Vec<f64>> = self.x_train.rows().into_iter().map(|r| r.to_vec()).collect();
        Ok(json!({
            "model": "KNeighborsClassifier",
            "n_neighbors": self.n_neighbors,
            "classes": self.classes,
            "x_train": rows,
            "y_train": self.y_train,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_vote_fractions() {
        let x = array![[0.0], [1.0], [2.0], [10.0]];
        let mut knn = KNeighborsClassifier::new(3);
        knn.fit(x.view(), &[0, 0, 1, 1]).unwrap();

        let p = knn.predict_proba(array![[0.5], [9.0]].view()).unwrap();
        assert!((p[[0, 0]] - 2.0 / 3.0).abs() < 1e-12);
        assert!((p[[1, 1]] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_k_larger_than_training_set() {
        let x = array![[0.0], [1.0]];
        let mut knn = KNeighborsClassifier::new(3);
        assert!(knn.fit(x.view(), &[0, 1]).is_err());
    }

    #[test]
    fn test_feature_count_mismatch() {
        let x = array![[0.0], [1.0]];
        let mut knn = KNeighborsClassifier::new(1);
        knn.fit(x.view(), &[0, 1]).unwrap();
        assert!(knn.predict_proba(array![[0.0, 1.0]].view()).is_err());
    }
}
