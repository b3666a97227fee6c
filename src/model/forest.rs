//! Bagged decision-tree ensemble for colour classification.
//!
//! Each member is a smartcore decision tree fitted on a bootstrap sample
//! of the training rows and a random subset of the feature columns. The
//! class probability is the share of members voting for it, so the top
//! class's probability is the prediction confidence.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_classifier::{
    DecisionTreeClassifier, DecisionTreeClassifierParameters,
};
use std::fmt;

use super::ModelError;

type Tree = DecisionTreeClassifier<f64, u32, DenseMatrix<f64>, Vec<u32>>;

/// Ensemble hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: u16,
    pub min_samples_split: usize,
    /// Feature columns drawn per tree (clamped to the available count).
    pub max_features: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 10,
            min_samples_split: 2,
            max_features: 13,
            seed: 42,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum Member {
    Tree { columns: Vec<usize>, tree: Tree },
    /// Bootstrap sample held a single class; smartcore needs at least two.
    Constant { class: u32 },
}

/// Fitted ensemble.
#[derive(Serialize, Deserialize)]
pub struct ColorForest {
    members: Vec<Member>,
    n_classes: usize,
    n_features: usize,
}

impl fmt::Debug for ColorForest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorForest")
            .field("members", &self.members.len())
            .field("n_classes", &self.n_classes)
            .field("n_features", &self.n_features)
            .finish()
    }
}

impl ColorForest {
    /// Fit on row-major features `x` and class indices `y` (`< n_classes`).
    ///
    /// Member `t` draws its bootstrap sample and columns from a generator
    /// seeded with `seed + t`, so identical input gives an identical forest.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[u32],
        n_classes: usize,
        params: &ForestParams,
    ) -> Result<Self, ModelError> {
        if x.is_empty() {
            return Err(ModelError::Fit("no training rows".into()));
        }
        if x.len() != y.len() {
            return Err(ModelError::Fit(format!(
                "{} rows but {} labels",
                x.len(),
                y.len()
            )));
        }
        if let Some(&bad) = y.iter().find(|&&c| c as usize >= n_classes) {
            return Err(ModelError::Fit(format!(
                "class {bad} outside 0..{n_classes}"
            )));
        }

        let n_rows = x.len();
        let n_features = x[0].len();
        if n_features == 0 || x.iter().any(|r| r.len() != n_features) {
            return Err(ModelError::Fit("ragged or empty feature rows".into()));
        }
        let per_tree = params.max_features.clamp(1, n_features);

        let n_trees = params.n_trees.max(1);
        let mut members = Vec::with_capacity(n_trees);
        for t in 0..n_trees {
            let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64));
            let sample: Vec<usize> = (0..n_rows).map(|_| rng.random_range(0..n_rows)).collect();
            let mut columns = index::sample(&mut rng, n_features, per_tree).into_vec();
            columns.sort_unstable();

            let labels: Vec<u32> = sample.iter().map(|&i| y[i]).collect();
            let first = labels[0];
            if labels.iter().all(|&c| c == first) {
                members.push(Member::Constant { class: first });
                continue;
            }

            let rows: Vec<Vec<f64>> = sample.iter().map(|&i| project(&x[i], &columns)).collect();
            let matrix = DenseMatrix::from_2d_vec(&rows)
                .map_err(|e| ModelError::Fit(format!("matrix creation failed: {e}")))?;
            let tree_params = DecisionTreeClassifierParameters::default()
                .with_max_depth(params.max_depth)
                .with_min_samples_split(params.min_samples_split);
            let tree = DecisionTreeClassifier::fit(&matrix, &labels, tree_params)
                .map_err(|e| ModelError::Fit(format!("tree {t}: {e}")))?;
            members.push(Member::Tree { columns, tree });
        }

        Ok(Self {
            members,
            n_classes,
            n_features,
        })
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Per-row class probabilities (vote shares). Each row sums to 1.
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ModelError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != self.n_features) {
            return Err(ModelError::Schema(format!(
                "expected {} features, got {}",
                self.n_features,
                bad.len()
            )));
        }

        let mut votes = vec![vec![0u32; self.n_classes]; rows.len()];
        for member in &self.members {
            let predicted = match member {
                Member::Constant { class } => vec![*class; rows.len()],
                Member::Tree { columns, tree } => {
                    let projected: Vec<Vec<f64>> =
                        rows.iter().map(|r| project(r, columns)).collect();
                    let matrix = DenseMatrix::from_2d_vec(&projected)
                        .map_err(|e| ModelError::Predict(format!("matrix creation failed: {e}")))?;
                    tree.predict(&matrix)
                        .map_err(|e| ModelError::Predict(e.to_string()))?
                }
            };
            for (row_votes, class) in votes.iter_mut().zip(predicted) {
                if let Some(v) = row_votes.get_mut(class as usize) {
                    *v += 1;
                }
            }
        }

        let total = self.members.len() as f64;
        Ok(votes
            .into_iter()
            .map(|v| v.into_iter().map(|c| f64::from(c) / total).collect())
            .collect())
    }

    /// Top class and its probability for a single row.
    pub fn predict_one(&self, row: &[f64]) -> Result<(u32, f64), ModelError> {
        let probs = self.predict_proba(&[row.to_vec()])?;
        probs
            .first()
            .map(|p| top_class(p))
            .ok_or_else(|| ModelError::Predict("no prediction returned".into()))
    }

    /// Fraction of rows whose top class matches the label.
    pub fn score(&self, x: &[Vec<f64>], y: &[u32]) -> Result<f64, ModelError> {
        if x.is_empty() {
            return Ok(0.0);
        }
        let probs = self.predict_proba(x)?;
        let correct = probs
            .iter()
            .zip(y)
            .filter(|(p, label)| top_class(p).0 == **label)
            .count();
        Ok(correct as f64 / x.len() as f64)
    }
}

/// Highest-probability class; ties go to the lowest index.
pub fn top_class(probs: &[f64]) -> (u32, f64) {
    let mut best = (0u32, f64::NEG_INFINITY);
    for (i, &p) in probs.iter().enumerate() {
        if p > best.1 {
            best = (i as u32, p);
        }
    }
    (best.0, best.1.clamp(0.0, 1.0))
}

fn project(row: &[f64], columns: &[usize]) -> Vec<f64> {
    columns.iter().map(|&c| row[c]).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
