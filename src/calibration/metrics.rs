use serde::Serialize;

/// Clamp applied to probabilities before taking logs.
const EPS: f64 = 1e-7;

/// Default number of equal-width probability bins.
pub const DEFAULT_BINS: usize = 10;

/// Bins with fewer samples than this are left out of the reliability diagram.
const MIN_BIN_SAMPLES: usize = 2;

/// A forecast paired with the realized outcome of a resolved event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationInput {
    pub probability: f64,
    /// 1.0 if the event resolved YES, 0.0 if NO
    pub outcome: f64,
}

impl CalibrationInput {
    pub fn new(probability: f64, outcome: u8) -> Self {
        Self {
            probability,
            outcome: f64::from(outcome),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityPoint {
    pub midpoint: f64,
    pub predicted: f64,
    pub actual: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bin {
    count: usize,
    sum_predicted: f64,
    sum_actual: f64,
}

impl Bin {
    fn mean_predicted(&self) -> f64 {
        self.sum_predicted / self.count as f64
    }

    fn mean_actual(&self) -> f64 {
        self.sum_actual / self.count as f64
    }
}

/// Index of the bin holding `probability`; p = 1.0 lands in the last bin.
fn bin_index(probability: f64, num_bins: usize) -> usize {
    let idx = (probability * num_bins as f64).floor().max(0.0) as usize;
    idx.min(num_bins - 1)
}

fn fill_bins(data: &[CalibrationInput], num_bins: usize) -> Vec<Bin> {
    let mut bins = vec![Bin::default(); num_bins];
    for d in data {
        let bin = &mut bins[bin_index(d.probability, num_bins)];
        bin.count += 1;
        bin.sum_predicted += d.probability;
        bin.sum_actual += d.outcome;
    }
    bins
}

/// Mean squared error between forecast and outcome.
/// Empty input scores 1.0 (worst) so models without data never rank first.
pub fn brier_score(data: &[CalibrationInput]) -> f64 {
    if data.is_empty() {
        return 1.0;
    }

    data.iter()
        .map(|d| (d.probability - d.outcome).powi(2))
        .sum::<f64>()
        / data.len() as f64
}

/// Mean negative log-likelihood. Empty input is `f64::INFINITY`.
pub fn log_loss(data: &[CalibrationInput]) -> f64 {
    if data.is_empty() {
        return f64::INFINITY;
    }

    let total: f64 = data
        .iter()
        .map(|d| {
            let p = d.probability.clamp(EPS, 1.0 - EPS);
            d.outcome * p.ln() + (1.0 - d.outcome) * (1.0 - p).ln()
        })
        .sum();

    -total / data.len() as f64
}

/// Count-weighted mean of |mean predicted - mean actual| over non-empty bins.
pub fn expected_calibration_error(data: &[CalibrationInput], num_bins: usize) -> f64 {
    if data.is_empty() || num_bins == 0 {
        return 0.0;
    }

    let total = data.len() as f64;
    fill_bins(data, num_bins)
        .iter()
        .filter(|bin| bin.count > 0)
        .map(|bin| (bin.count as f64 / total) * (bin.mean_predicted() - bin.mean_actual()).abs())
        .sum()
}

/// Signed mean error. Positive means the model leans towards YES too much.
pub fn calibration_bias(data: &[CalibrationInput]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    data.iter()
        .map(|d| d.probability - d.outcome)
        .sum::<f64>()
        / data.len() as f64
}

/// One point per bin holding at least two samples, in bin order.
pub fn reliability_diagram_data(data: &[CalibrationInput], num_bins: usize) -> Vec<ReliabilityPoint> {
    if num_bins == 0 {
        return Vec::new();
    }

    fill_bins(data, num_bins)
        .iter()
        .enumerate()
        .filter(|(_, bin)| bin.count >= MIN_BIN_SAMPLES)
        .map(|(i, bin)| ReliabilityPoint {
            midpoint: (i as f64 + 0.5) / num_bins as f64,
            predicted: bin.mean_predicted(),
            actual: bin.mean_actual(),
            count: bin.count,
        })
        .collect()
}
