use crate::models::Candle;
use statrs::statistics::Statistics;

/// Mean of the `period` values ending at `index` (inclusive). `None` until the window is full.
pub fn sma_at(prices: &[f64], period: usize, index: usize) -> Option<f64> {
    if period == 0 || index >= prices.len() || index + 1 < period {
        return None;
    }
    let window = &prices[index + 1 - period..=index];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Sample standard deviation (n - 1) of the `period` values ending at `index`.
pub fn sample_std_at(prices: &[f64], period: usize, index: usize) -> Option<f64> {
    if period < 2 || index >= prices.len() || index + 1 < period {
        return None;
    }
    let std_dev = prices[index + 1 - period..=index].iter().std_dev();
    if std_dev.is_finite() {
        Some(std_dev)
    } else {
        None
    }
}

/// Exponential moving average seeded with the first price, smoothing factor `2 / (period + 1)`.
pub fn calculate_ema(prices: &[f64], period: usize) -> Vec<f64> {
    if prices.is_empty() {
        return Vec::new();
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(prices.len());
    ema_values.push(prices[0]);

    for i in 1..prices.len() {
        let ema = (prices[i] * multiplier) + (ema_values[i - 1] * (1.0 - multiplier));
        ema_values.push(ema);
    }

    ema_values
}

/// Exponential smoothing over a series with gaps, using center-of-mass `com`
/// (alpha = 1 / (1 + com)).
///
/// Output stays `None` until the first defined input. A gap keeps the previous
/// value and decays the weight of the history, so the next observation is
/// blended as `((1-a)^(gap+1) * prev + a * x) / ((1-a)^(gap+1) + a)`.
pub fn smooth_with_gaps(values: &[Option<f64>], com: f64) -> Vec<Option<f64>> {
    let alpha = 1.0 / (1.0 + com.max(0.0));
    let decay = 1.0 - alpha;
    let mut output = Vec::with_capacity(values.len());
    let mut weighted: Option<f64> = None;
    let mut old_weight = 1.0;

    for value in values {
        match (weighted, value) {
            (None, Some(x)) => {
                weighted = Some(*x);
                old_weight = 1.0;
            }
            (None, None) => {}
            (Some(prev), Some(x)) => {
                old_weight *= decay;
                let blended = if prev == *x {
                    prev
                } else {
                    (old_weight * prev + alpha * x) / (old_weight + alpha)
                };
                weighted = Some(blended);
                old_weight = 1.0;
            }
            (Some(_), None) => {
                old_weight *= decay;
            }
        }
        output.push(weighted);
    }

    output
}

pub fn calculate_macd(
    prices: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let fast_ema = calculate_ema(prices, fast_period);
    let slow_ema = calculate_ema(prices, slow_period);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(fast, slow)| fast - slow)
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);

    let histogram = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(macd, signal)| macd - signal)
        .collect();

    (macd_line, signal_line, histogram)
}

fn rsi_from_avgs(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        None
    } else if avg_loss == 0.0 {
        Some(100.0)
    } else {
        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

/// RSI at `index` from simple rolling means of gains and losses over the last
/// `period` price changes. The change into the first price counts as zero.
pub fn rsi_at(prices: &[f64], period: usize, index: usize) -> Option<f64> {
    if period == 0 || index >= prices.len() || index + 1 < period {
        return None;
    }

    let mut sum_gain = 0.0;
    let mut sum_loss = 0.0;
    for i in (index + 1 - period)..=index {
        if i == 0 {
            continue;
        }
        let delta = prices[i] - prices[i - 1];
        if delta > 0.0 {
            sum_gain += delta;
        } else if delta < 0.0 {
            sum_loss += -delta;
        }
    }

    rsi_from_avgs(sum_gain / period as f64, sum_loss / period as f64)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KdjOutput {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

/// Raw stochastic value: where the close sits inside the high/low range of the last `period` candles.
pub fn calculate_rsv(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut rsv = Vec::with_capacity(candles.len());
    for index in 0..candles.len() {
        if period == 0 || index + 1 < period {
            rsv.push(None);
            continue;
        }
        let window = &candles[index + 1 - period..=index];
        let low_min = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let high_max = window
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let value = 100.0 * (candles[index].close - low_min) / (high_max - low_min);
        rsv.push(if value.is_finite() { Some(value) } else { None });
    }
    rsv
}

pub fn calculate_kdj(
    candles: &[Candle],
    period: usize,
    smooth_k: usize,
    smooth_d: usize,
) -> Vec<Option<KdjOutput>> {
    let rsv = calculate_rsv(candles, period);
    let k_line = smooth_with_gaps(&rsv, smooth_k as f64 - 1.0);
    let d_line = smooth_with_gaps(&k_line, smooth_d as f64 - 1.0);

    k_line
        .iter()
        .zip(d_line.iter())
        .map(|(k, d)| match (k, d) {
            (Some(k), Some(d)) => Some(KdjOutput {
                k: *k,
                d: *d,
                j: 3.0 * k - 2.0 * d,
            }),
            _ => None,
        })
        .collect()
}

/// Distance of the price at `index` from its rolling mean, in sample standard deviations.
pub fn zscore_at(prices: &[f64], period: usize, index: usize) -> Option<f64> {
    let mean = sma_at(prices, period, index)?;
    let std_dev = sample_std_at(prices, period, index)?;
    if std_dev == 0.0 {
        return None;
    }
    let z = (prices[index] - mean) / std_dev;
    if z.is_finite() {
        Some(z)
    } else {
        None
    }
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}
