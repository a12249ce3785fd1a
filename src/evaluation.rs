//! Classification metrics on the held-out partition.

use ndarray::Array1;
use serde::Serialize;

use crate::models::ModelError;

/// Counts of a binary classifier; class 1 is fraud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &Array1<usize>, y_pred: &Array1<usize>) -> Self {
        let mut cm = ConfusionMatrix::default();
        for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
            match (t == 1, p == 1) {
                (true, true) => cm.tp += 1,
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// Area under the ROC curve via the Mann-Whitney rank statistic, tied
/// scores sharing their average rank.
pub fn roc_auc(y_true: &Array1<usize>, scores: &Array1<f64>) -> Result<f64, ModelError> {
    let mut pairs: Vec<(f64, bool)> = scores
        .iter()
        .zip(y_true.iter())
        .map(|(&s, &t)| (s, t == 1))
        .collect();
    let n_pos = pairs.iter().filter(|(_, t)| *t).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(ModelError::UndefinedMetric(
            "ROC AUC needs both classes in the held-out labels".to_string(),
        ));
    }

    pairs.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < pairs.len() {
        let mut end = start + 1;
        while end < pairs.len() && pairs[end].0 == pairs[start].0 {
            end += 1;
        }
        // ranks are 1-based; the tie block [start, end) shares the mean
        let rank = (start + end + 1) as f64 / 2.0;
        let positives = pairs[start..end].iter().filter(|(_, t)| *t).count();
        positive_rank_sum += rank * positives as f64;
        start = end;
    }

    let (n_pos, n_neg) = (n_pos as f64, n_neg as f64);
    Ok((positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// One row of `model_metrics.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetrics {
    pub model_name: String,
    pub accuracy: f64,
    pub precision_fraud: f64,
    pub recall_fraud: f64,
    pub f1_fraud: f64,
    pub auc: f64,
}

/// Metrics of one model from its positive-class probabilities.
pub fn evaluate(
    model_name: &str,
    y_true: &Array1<usize>,
    proba: &Array1<f64>,
) -> Result<(ModelMetrics, ConfusionMatrix), ModelError> {
    let y_pred = proba.mapv(|p| usize::from(p > 0.5));
    let cm = ConfusionMatrix::from_predictions(y_true, &y_pred);
    let metrics = ModelMetrics {
        model_name: model_name.to_string(),
        accuracy: cm.accuracy(),
        precision_fraud: cm.precision(),
        recall_fraud: cm.recall(),
        f1_fraud: cm.f1(),
        auc: roc_auc(y_true, proba)?,
    };
    Ok((metrics, cm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_confusion_counts() {
        let cm = ConfusionMatrix::from_predictions(&array![1, 1, 0, 0, 1], &array![1, 0, 0, 1, 1]);
        assert_eq!(
            cm,
            ConfusionMatrix {
                tn: 1,
                fp: 1,
                fn_: 1,
                tp: 2
            }
        );
        assert_eq!(cm.total(), 5);
        assert!((cm.accuracy() - 0.6).abs() < 1e-12);
        assert!((cm.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.f1() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_ratios_are_zero() {
        let cm = ConfusionMatrix::from_predictions(&array![0, 0, 1], &array![0, 0, 0]);
        assert_eq!(cm.precision(), 0.0);
        assert_eq!(cm.recall(), 0.0);
        assert_eq!(cm.f1(), 0.0);
    }

    #[test]
    fn test_auc_perfect_and_inverted() {
        let y = array![0, 0, 1, 1];
        assert_eq!(roc_auc(&y, &array![0.1, 0.2, 0.8, 0.9]).unwrap(), 1.0);
        assert_eq!(roc_auc(&y, &array![0.9, 0.8, 0.2, 0.1]).unwrap(), 0.0);
    }

    #[test]
    fn test_auc_averages_ties() {
        let y = array![0, 1, 0, 1];
        assert_eq!(roc_auc(&y, &array![0.5, 0.5, 0.5, 0.5]).unwrap(), 0.5);
        // one positive above both negatives, one tied with a negative
        let y = array![0, 0, 1, 1];
        let auc = roc_auc(&y, &array![0.1, 0.4, 0.4, 0.9]).unwrap();
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class_is_an_error() {
        assert!(matches!(
            roc_auc(&array![0, 0], &array![0.1, 0.2]),
            Err(ModelError::UndefinedMetric(_))
        ));
    }

    #[test]
    fn test_evaluate_thresholds_above_half() {
        let y = array![0, 1, 1, 0];
        let (metrics, cm) = evaluate("m", &y, &array![0.5, 0.51, 0.9, 0.2]).unwrap();
        assert_eq!(cm.tp, 2);
        assert_eq!(cm.fp, 0);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.model_name, "m");
    }
}
