//! Trains the three fraud classifiers and scores the full feature matrix.

use linfa::traits::Fit;
use ndarray::{Array1, Array2};
use tracing::info;

use crate::config::ModelingConfig;
use crate::error::PipelineError;
use crate::evaluation::{evaluate, ConfusionMatrix, ModelMetrics};
use crate::features::FeatureMatrix;
use crate::models::{
    Classifier, GradientBoostingParams, LabeledDataset, LogisticRegressionParams, ModelError,
    RandomForestParams,
};
use crate::preprocessing::{stratified_split, StandardScaler};

/// Column appended to the scored export.
pub const SCORE_COLUMN: &str = "fraud_score_gbm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    LogisticRegression,
    RandomForest,
    GradientBoosting,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "Logistic Regression",
            ModelKind::RandomForest => "Random Forest",
            ModelKind::GradientBoosting => "Gradient Boosting",
        }
    }

    /// Only the linear model sees standardised features.
    pub fn uses_scaled_features(self) -> bool {
        matches!(self, ModelKind::LogisticRegression)
    }

    fn fit(
        self,
        train: &LabeledDataset,
        config: &ModelingConfig,
    ) -> Result<Box<dyn Classifier>, ModelError> {
        let model: Box<dyn Classifier> = match self {
            ModelKind::LogisticRegression => Box::new(LogisticRegressionParams::default().fit(train)?),
            ModelKind::RandomForest => Box::new(
                RandomForestParams::default()
                    .seed(config.seed)
                    .workers(config.workers)
                    .fit(train)?,
            ),
            ModelKind::GradientBoosting => Box::new(
                GradientBoostingParams::default()
                    .workers(config.workers)
                    .fit(train)?,
            ),
        };
        Ok(model)
    }
}

#[derive(Debug, Clone)]
pub struct ModelingReport {
    /// Logistic regression, random forest, gradient boosting
    pub metrics: Vec<ModelMetrics>,
    /// Boosted model on the held-out partition
    pub confusion: ConfusionMatrix,
    /// Boosted model probability for every row of the feature matrix
    pub scores: Array1<f64>,
    pub test_size: usize,
}

/// Held-out partition in both feature spaces.
struct Holdout {
    raw: Array2<f64>,
    scaled: Array2<f64>,
    labels: Array1<usize>,
}

impl Holdout {
    fn records(&self, kind: ModelKind) -> &Array2<f64> {
        if kind.uses_scaled_features() {
            &self.scaled
        } else {
            &self.raw
        }
    }
}

pub fn run(matrix: &FeatureMatrix, config: &ModelingConfig) -> Result<ModelingReport, PipelineError> {
    let split = stratified_split(&matrix.labels, config.test_ratio, config.seed)?;
    info!(
        train = split.train.len(),
        test = split.test.len(),
        seed = config.seed,
        "Split feature matrix"
    );

    let train = matrix.subset(&split.train);
    let test = matrix.subset(&split.test);

    let scaler = StandardScaler::fit(train.records());
    let train_scaled = LabeledDataset::new(scaler.transform(train.records()), train.targets().clone());
    let holdout = Holdout {
        scaled: scaler.transform(test.records()),
        raw: test.records().clone(),
        labels: test.targets().clone(),
    };

    let mut metrics = Vec::with_capacity(3);
    for kind in [ModelKind::LogisticRegression, ModelKind::RandomForest] {
        let model = train_model(kind, &train, &train_scaled, config)?;
        let (model_metrics, _) = assess(kind, model.as_ref(), &holdout)?;
        metrics.push(model_metrics);
    }

    let kind = ModelKind::GradientBoosting;
    let boosted = train_model(kind, &train, &train_scaled, config)?;
    let (model_metrics, confusion) = assess(kind, boosted.as_ref(), &holdout)?;
    metrics.push(model_metrics);

    let scores = boosted.predict_proba(&matrix.records);
    info!(rows = scores.len(), column = SCORE_COLUMN, "Scored feature matrix");

    Ok(ModelingReport {
        metrics,
        confusion,
        scores,
        test_size: split.test.len(),
    })
}

fn train_model(
    kind: ModelKind,
    train: &LabeledDataset,
    train_scaled: &LabeledDataset,
    config: &ModelingConfig,
) -> Result<Box<dyn Classifier>, ModelError> {
    info!(model = kind.name(), "Training model");
    let data = if kind.uses_scaled_features() {
        train_scaled
    } else {
        train
    };
    kind.fit(data, config)
}

fn assess(
    kind: ModelKind,
    model: &dyn Classifier,
    holdout: &Holdout,
) -> Result<(ModelMetrics, ConfusionMatrix), ModelError> {
    let proba = model.predict_proba(holdout.records(kind));
    let (metrics, confusion) = evaluate(kind.name(), &holdout.labels, &proba)?;
    info!(
        model = kind.name(),
        accuracy = metrics.accuracy,
        precision = metrics.precision_fraud,
        recall = metrics.recall_fraud,
        f1 = metrics.f1_fraud,
        auc = metrics.auc,
        "Evaluated model"
    );
    Ok((metrics, confusion))
}
