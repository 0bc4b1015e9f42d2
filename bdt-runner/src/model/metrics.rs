//! Classification metrics.

/// Area under the ROC curve, computed as the normalized Mann-Whitney U
/// statistic with average ranks for tied scores.
///
/// Returns `None` when either class is absent (the AUC is undefined) or
/// when the inputs have different lengths.
pub fn roc_auc(labels: &[i32], scores: &[f64]) -> Option<f64> {
    if labels.len() != scores.len() {
        return None;
    }
    let n_pos = labels.iter().filter(|&&y| y == 1).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Sum of (1-based, tie-averaged) ranks of the positives.
    let mut pos_rank_sum = 0.0;
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && scores[order[end]] == scores[order[start]] {
            end += 1;
        }
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        let positives = order[start..end]
            .iter()
            .filter(|&&i| labels[i] == 1)
            .count();
        pos_rank_sum += avg_rank * positives as f64;
        start = end;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    let u = pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg))
}

/// Fraction of positions where `predicted == labels`. Empty input gives 0.
pub fn accuracy(labels: &[i32], predicted: &[i32]) -> f64 {
    let n = labels.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let hits = labels
        .iter()
        .zip(predicted)
        .filter(|(y, p)| y == p)
        .count();
    hits as f64 / n as f64
}
