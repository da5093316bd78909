//! Offline evaluation of a loaded scorer against labelled rows, and
//! decision-threshold selection from the ROC curve.
//!
//! ROC construction follows scikit-learn's `roc_curve`: scores sorted
//! descending, one point per distinct score, and a leading `+inf` threshold
//! at (0, 0). [`roc_curve`] keeps every point (`drop_intermediate=False`);
//! [`roc_curve_with`] can drop collinear points like scikit-learn's default,
//! which is what the training scripts used when picking the G-mean threshold.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("labels ({labels}) and scores ({scores}) differ in length")]
    LengthMismatch { labels: usize, scores: usize },
    #[error("need both classes, got {positives} positive / {negatives} negative")]
    SingleClass { positives: usize, negatives: usize },
    #[error("score at row {row} is not finite")]
    NonFiniteScore { row: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct RocCurve {
    pub fpr: Vec<f64>,
    pub tpr: Vec<f64>,
    /// Decreasing; `thresholds[0]` is `+inf`.
    pub thresholds: Vec<f64>,
}

/// Full ROC curve, one point per distinct score.
pub fn roc_curve(labels: &[bool], scores: &[f64]) -> Result<RocCurve, EvalError> {
    roc_curve_with(labels, scores, false)
}

/// `drop_intermediate = true` matches scikit-learn's default: points that are
/// collinear with both neighbours are removed. Threshold selection on the
/// reduced curve can land on a different point than on the full one.
pub fn roc_curve_with(
    labels: &[bool],
    scores: &[f64],
    drop_intermediate: bool,
) -> Result<RocCurve, EvalError> {
    if labels.len() != scores.len() {
        return Err(EvalError::LengthMismatch {
            labels: labels.len(),
            scores: scores.len(),
        });
    }
    if let Some(row) = scores.iter().position(|s| !s.is_finite()) {
        return Err(EvalError::NonFiniteScore { row });
    }
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(EvalError::SingleClass {
            positives,
            negatives,
        });
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    // cumulative (fp, tp, threshold) at the end of each run of equal scores
    let mut points: Vec<(usize, usize, f64)> = Vec::new();
    let (mut tp, mut fp) = (0usize, 0usize);
    for (k, &i) in order.iter().enumerate() {
        if labels[i] {
            tp += 1;
        } else {
            fp += 1;
        }
        let last_of_run = order
            .get(k + 1)
            .map_or(true, |&j| scores[j] != scores[i]);
        if last_of_run {
            points.push((fp, tp, scores[i]));
        }
    }

    if drop_intermediate && points.len() > 2 {
        let n = points.len();
        let second_diff = |a: usize, b: usize, c: usize| (a + c) as i64 - 2 * b as i64;
        let keep: Vec<bool> = (0..n)
            .map(|i| {
                i == 0
                    || i == n - 1
                    || second_diff(points[i - 1].0, points[i].0, points[i + 1].0) != 0
                    || second_diff(points[i - 1].1, points[i].1, points[i + 1].1) != 0
            })
            .collect();
        points = points
            .into_iter()
            .zip(keep)
            .filter_map(|(p, k)| k.then_some(p))
            .collect();
    }

    let mut fpr = vec![0.0];
    let mut tpr = vec![0.0];
    let mut thresholds = vec![f64::INFINITY];
    for (fp, tp, t) in points {
        fpr.push(fp as f64 / negatives as f64);
        tpr.push(tp as f64 / positives as f64);
        thresholds.push(t);
    }

    Ok(RocCurve {
        fpr,
        tpr,
        thresholds,
    })
}

impl RocCurve {
    /// Area under the curve, trapezoidal rule.
    pub fn auc(&self) -> f64 {
        self.fpr
            .windows(2)
            .zip(self.tpr.windows(2))
            .map(|(x, y)| (x[1] - x[0]) * (y[0] + y[1]) / 2.0)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// argmax sqrt(TPR * (1 - FPR))
    GMean,
    /// argmax TPR - FPR (Youden's J)
    Youden,
}

impl std::str::FromStr for ThresholdMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gmean" | "g-mean" | "g_mean" => Ok(Self::GMean),
            "youden" | "j" => Ok(Self::Youden),
            other => Err(format!("unknown threshold method `{other}` (gmean | youden)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdChoice {
    pub method: ThresholdMethod,
    pub threshold: f64,
    pub tpr: f64,
    pub fpr: f64,
    /// value of the criterion at the chosen point
    pub objective: f64,
}

/// Best finite threshold under `method`; ties keep the higher threshold.
pub fn select_threshold(roc: &RocCurve, method: ThresholdMethod) -> Option<ThresholdChoice> {
    let mut best: Option<ThresholdChoice> = None;
    for i in 0..roc.thresholds.len() {
        let t = roc.thresholds[i];
        if !t.is_finite() {
            continue;
        }
        let (tpr, fpr) = (roc.tpr[i], roc.fpr[i]);
        let objective = match method {
            ThresholdMethod::GMean => (tpr * (1.0 - fpr)).sqrt(),
            ThresholdMethod::Youden => tpr - fpr,
        };
        if best.map_or(true, |b| objective > b.objective) {
            best = Some(ThresholdChoice {
                method,
                threshold: t,
                tpr,
                fpr,
                objective,
            });
        }
    }
    best
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
    pub tp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn class_metrics(tp: usize, fp: usize, fn_: usize) -> ClassMetrics {
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassMetrics {
        precision,
        recall,
        f1,
        support: tp + fn_,
    }
}

impl ConfusionMatrix {
    /// Predictions are `score >= threshold`, same rule as the scorer.
    pub fn at(labels: &[bool], scores: &[f64], threshold: f64) -> Self {
        let mut m = Self::default();
        for (&y, &s) in labels.iter().zip(scores) {
            match (y, s >= threshold) {
                (true, true) => m.tp += 1,
                (true, false) => m.fn_ += 1,
                (false, true) => m.fp += 1,
                (false, false) => m.tn += 1,
            }
        }
        m
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    pub fn sensitivity(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn specificity(&self) -> f64 {
        ratio(self.tn, self.tn + self.fp)
    }

    /// Per-class metrics: `(negative class, positive class)`.
    pub fn report(&self) -> (ClassMetrics, ClassMetrics) {
        (
            class_metrics(self.tn, self.fn_, self.fp),
            class_metrics(self.tp, self.fp, self.fn_),
        )
    }
}

/// Everything `evaluate` prints, serializable for `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub rows: usize,
    pub positives: usize,
    pub auc: f64,
    pub threshold: f64,
    pub confusion: ConfusionMatrix,
    pub negative: ClassMetrics,
    pub positive: ClassMetrics,
    pub gmean_choice: Option<ThresholdChoice>,
    pub youden_choice: Option<ThresholdChoice>,
}

impl EvaluationReport {
    pub fn build(labels: &[bool], scores: &[f64], threshold: f64) -> Result<Self, EvalError> {
        let roc = roc_curve(labels, scores)?;
        let confusion = ConfusionMatrix::at(labels, scores, threshold);
        let (negative, positive) = confusion.report();
        Ok(Self {
            rows: labels.len(),
            positives: labels.iter().filter(|&&l| l).count(),
            auc: roc.auc(),
            threshold,
            confusion,
            negative,
            positive,
            gmean_choice: select_threshold(&roc, ThresholdMethod::GMean),
            youden_choice: select_threshold(&roc, ThresholdMethod::Youden),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn roc_matches_sklearn_reference() {
        // sklearn: roc_curve([0,0,1,1],[0.1,0.4,0.35,0.8], drop_intermediate=False)
        let labels = [false, false, true, true];
        let scores = [0.1, 0.4, 0.35, 0.8];
        let roc = roc_curve(&labels, &scores).unwrap();
        assert_eq!(roc.thresholds[1..], [0.8, 0.4, 0.35, 0.1]);
        assert_eq!(roc.tpr, vec![0.0, 0.5, 0.5, 1.0, 1.0]);
        assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 0.5, 1.0]);
        assert!(close(roc.auc(), 0.75));
    }

    #[test]
    fn drop_intermediate_removes_collinear_points() {
        // sklearn: roc_curve([1,1,1,0],[0.9,0.8,0.7,0.1]) drops 0.8
        let labels = [true, true, true, false];
        let scores = [0.9, 0.8, 0.7, 0.1];
        let full = roc_curve(&labels, &scores).unwrap();
        assert_eq!(full.thresholds.len(), 5);

        let reduced = roc_curve_with(&labels, &scores, true).unwrap();
        assert_eq!(reduced.thresholds[1..], [0.9, 0.7, 0.1]);
        assert_eq!(reduced.fpr, vec![0.0, 0.0, 0.0, 1.0]);
        assert!(close(reduced.tpr[1], 1.0 / 3.0));
        assert_eq!(reduced.tpr[2..], [1.0, 1.0]);
        assert!(close(reduced.auc(), full.auc()));

        // nothing collinear: same curve either way
        let labels = [false, false, true, true];
        let scores = [0.1, 0.4, 0.35, 0.8];
        assert_eq!(
            roc_curve_with(&labels, &scores, true).unwrap().thresholds,
            roc_curve(&labels, &scores).unwrap().thresholds
        );
    }

    #[test]
    fn tied_scores_collapse_into_one_point() {
        let labels = [true, false, true, false];
        let scores = [0.5, 0.5, 0.9, 0.1];
        let roc = roc_curve(&labels, &scores).unwrap();
        assert_eq!(roc.thresholds.len(), 4);
        assert_eq!(roc.tpr, vec![0.0, 0.5, 1.0, 1.0]);
        assert_eq!(roc.fpr, vec![0.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn perfect_separation_picks_the_gap() {
        let labels = [false, false, true, true];
        let scores = [0.1, 0.2, 0.7, 0.9];
        let roc = roc_curve(&labels, &scores).unwrap();
        assert!(close(roc.auc(), 1.0));
        let g = select_threshold(&roc, ThresholdMethod::GMean).unwrap();
        assert_eq!(g.threshold, 0.7);
        assert!(close(g.objective, 1.0));
        let j = select_threshold(&roc, ThresholdMethod::Youden).unwrap();
        assert_eq!(j.threshold, 0.7);
    }

    #[test]
    fn single_class_is_an_error() {
        let err = roc_curve(&[true, true], &[0.2, 0.4]).unwrap_err();
        assert_eq!(
            err,
            EvalError::SingleClass {
                positives: 2,
                negatives: 0
            }
        );
        assert!(roc_curve(&[true], &[0.2, 0.3]).is_err());
        assert!(roc_curve(&[true, false], &[f64::NAN, 0.3]).is_err());
    }

    #[test]
    fn confusion_matrix_uses_inclusive_threshold() {
        let labels = [true, true, false, false, true];
        let scores = [0.48, 0.2, 0.48, 0.1, 0.9];
        let m = ConfusionMatrix::at(&labels, &scores, 0.48);
        assert_eq!(
            m,
            ConfusionMatrix {
                tn: 1,
                fp: 1,
                fn_: 1,
                tp: 2
            }
        );
        assert!(close(m.sensitivity(), 2.0 / 3.0));
        assert!(close(m.specificity(), 0.5));
        let (neg, pos) = m.report();
        assert!(close(pos.precision, 2.0 / 3.0));
        assert_eq!(pos.support, 3);
        assert_eq!(neg.support, 2);
    }

    #[test]
    fn method_parsing() {
        assert_eq!("G-Mean".parse::<ThresholdMethod>(), Ok(ThresholdMethod::GMean));
        assert_eq!("youden".parse::<ThresholdMethod>(), Ok(ThresholdMethod::Youden));
        assert!("f1".parse::<ThresholdMethod>().is_err());
    }
}
