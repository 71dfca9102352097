//! Indicator computation over daily bars.
//!
//! Agents consume indicators by name from an [`IndicatorSet`]; this module is
//! the adapter that fills the set from raw bars. Every function returns
//! `None` (or an empty series) instead of `NaN` when the window is too short.

use super::bundle::{names, Bar, IndicatorSet};

/// Build the full indicator bundle for a bar history.
pub fn compute(bars: &[Bar]) -> IndicatorSet {
    let mut set = IndicatorSet::new();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    if let Some(v) = rsi(&closes, 14) {
        set.insert_scalar(names::RSI, v);
    }
    if let Some(v) = macd_histogram(&closes) {
        set.insert_scalar(names::MACD_HIST, v);
    }
    if let Some(v) = atr(bars, 14) {
        set.insert_scalar(names::ATR, v);
        if let Some(close) = closes.last().filter(|c| **c > 0.0) {
            set.insert_scalar(names::NATR, v / close * 100.0);
        }
    }
    if let Some(v) = sma(&closes, 50) {
        set.insert_scalar(names::SMA_50, v);
    }
    if let Some(v) = sma(&closes, 200) {
        set.insert_scalar(names::SMA_200, v);
    }

    set.insert_series(names::OBV, obv(bars));
    set.insert_series(names::AD, ad_line(bars));
    if let Some(v) = mfi(bars, 14) {
        set.insert_scalar(names::MFI, v);
    }
    if let Some(v) = cmf(bars, 20) {
        set.insert_scalar(names::CMF, v);
    }
    if let Some(v) = rolling_vwap(bars, 20) {
        set.insert_scalar(names::VWAP, v);
    }
    if let Some(v) = volume_zscore(bars, 20) {
        set.insert_scalar(names::VOLUME_ZSCORE, v);
    }

    set
}

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Wilder-smoothed RSI over `period` bars.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = closes[i] - closes[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss += -delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in (period + 1)..closes.len() {
        let delta = closes[i] - closes[i - 1];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD(12, 26, 9) histogram at the last bar.
pub fn macd_histogram(closes: &[f64]) -> Option<f64> {
    if closes.len() < 35 {
        return None;
    }
    let fast = ema_series(closes, 12);
    let slow = ema_series(closes, 26);
    let macd_line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema_series(&macd_line, 9);
    Some(macd_line.last()? - signal.last()?)
}

fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    for v in values {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Wilder-smoothed Average True Range.
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let mut trs = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let prev_close = pair[0].close;
        let bar = pair[1];
        let tr = (bar.high - bar.low)
            .max((bar.high - prev_close).abs())
            .max((bar.low - prev_close).abs());
        trs.push(tr);
    }
    let mut atr = trs[..period].iter().sum::<f64>() / period as f64;
    for tr in &trs[period..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }
    Some(atr)
}

/// On-balance volume series, aligned with the bars.
pub fn obv(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut running = 0.0;
    for (i, bar) in bars.iter().enumerate() {
        if i > 0 {
            if bar.close > bars[i - 1].close {
                running += bar.volume;
            } else if bar.close < bars[i - 1].close {
                running -= bar.volume;
            }
        }
        out.push(running);
    }
    out
}

/// Accumulation/distribution line series, aligned with the bars.
pub fn ad_line(bars: &[Bar]) -> Vec<f64> {
    let mut out = Vec::with_capacity(bars.len());
    let mut running = 0.0;
    for bar in bars {
        let range = bar.high - bar.low;
        if range > 0.0 {
            let mfm = ((bar.close - bar.low) - (bar.high - bar.close)) / range;
            running += mfm * bar.volume;
        }
        out.push(running);
    }
    out
}

/// Money Flow Index over `period` bars.
pub fn mfi(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }
    let typical: Vec<f64> = bars.iter().map(|b| (b.high + b.low + b.close) / 3.0).collect();
    let window = bars.len() - period;
    let mut positive = 0.0;
    let mut negative = 0.0;
    for i in window..bars.len() {
        let flow = typical[i] * bars[i].volume;
        if typical[i] > typical[i - 1] {
            positive += flow;
        } else if typical[i] < typical[i - 1] {
            negative += flow;
        }
    }
    if negative == 0.0 {
        return Some(100.0);
    }
    let ratio = positive / negative;
    Some(100.0 - 100.0 / (1.0 + ratio))
}

/// Chaikin Money Flow over `period` bars.
pub fn cmf(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    let mut mf_volume = 0.0;
    let mut volume = 0.0;
    for bar in window {
        let range = bar.high - bar.low;
        if range > 0.0 {
            let mfm = ((bar.close - bar.low) - (bar.high - bar.close)) / range;
            mf_volume += mfm * bar.volume;
        }
        volume += bar.volume;
    }
    if volume == 0.0 {
        return None;
    }
    Some(mf_volume / volume)
}

/// Rolling volume-weighted average price over the trailing `period` bars.
pub fn rolling_vwap(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    let mut pv = 0.0;
    let mut volume = 0.0;
    for bar in window {
        let typical = (bar.high + bar.low + bar.close) / 3.0;
        pv += typical * bar.volume;
        volume += bar.volume;
    }
    if volume == 0.0 {
        return None;
    }
    Some(pv / volume)
}

/// Z-score of the latest volume against the trailing `period` bars.
pub fn volume_zscore(bars: &[Bar], period: usize) -> Option<f64> {
    if period < 2 || bars.len() < period + 1 {
        return None;
    }
    let window: Vec<f64> = bars[bars.len() - 1 - period..bars.len() - 1]
        .iter()
        .map(|b| b.volume)
        .collect();
    let mean = window.iter().sum::<f64>() / window.len() as f64;
    let variance =
        window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window.len() - 1) as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return None;
    }
    Some((bars.last()?.volume - mean) / std)
}
