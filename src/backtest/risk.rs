//! Risk policy layer: drawdown defense, quality-tiered trailing stops,
//! volatility scaling, and concentration caps.
//!
//! The manager is stateful over one backtest run (running peak, defensive
//! flag) and records every action it takes as a typed event.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::bundle::Symbol;

use super::types::Position;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Drawdown from peak beyond which defensive mode engages.
    pub max_drawdown: f64,
    /// Target cash fraction while defensive.
    pub cash_buffer_on_drawdown: f64,
    /// Annualized portfolio volatility ceiling.
    pub max_volatility: f64,
    /// Target-size multiplier applied above the volatility ceiling.
    pub volatility_scale_factor: f64,
    /// Per-symbol weight cap.
    pub max_position_size: f64,
    /// Per-sector weight cap.
    pub max_sector_concentration: f64,
    /// Trailing-stop thresholds (drop from peak) by entry quality tier.
    pub stop_loss_high_quality: f64,
    pub stop_loss_medium_quality: f64,
    pub stop_loss_low_quality: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_drawdown: 0.15,
            cash_buffer_on_drawdown: 0.50,
            max_volatility: 0.27,
            volatility_scale_factor: 0.75,
            max_position_size: 0.10,
            max_sector_concentration: 0.40,
            stop_loss_high_quality: 0.30,
            stop_loss_medium_quality: 0.20,
            stop_loss_low_quality: 0.10,
        }
    }
}

/// Entry-quality tier. High-quality names get room to recover; low-quality
/// names are cut fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityTier {
    High,
    Medium,
    Low,
}

impl QualityTier {
    /// The 50.0 default lands in MEDIUM, so unknown quality is not cut on
    /// the tightest stop.
    pub fn from_score(quality_score: f64) -> Self {
        if quality_score > 70.0 {
            QualityTier::High
        } else if quality_score >= 50.0 {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }

    pub fn stop_threshold(self, limits: &RiskLimits) -> f64 {
        match self {
            QualityTier::High => limits.stop_loss_high_quality,
            QualityTier::Medium => limits.stop_loss_medium_quality,
            QualityTier::Low => limits.stop_loss_low_quality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskEventKind {
    DrawdownProtection,
    StopLoss,
    SectorCap,
    PositionCap,
    VolatilityScale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub date: NaiveDate,
    pub kind: RiskEventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    pub detail: String,
}

/// Drawdown check outcome for one day.
#[derive(Debug, Clone, Copy)]
pub struct DrawdownStatus {
    pub drawdown: f64,
    pub defensive: bool,
    /// Target cash fraction at the next rebalance.
    pub cash_allocation: f64,
}

/// A position the stop policy wants closed.
#[derive(Debug, Clone)]
pub struct StopOut {
    pub symbol: Symbol,
    pub price: f64,
    pub drop_from_peak: f64,
    pub tier: QualityTier,
}

pub struct RiskManager {
    limits: RiskLimits,
    peak_value: f64,
    defensive: bool,
    events: Vec<RiskEvent>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            peak_value: 0.0,
            defensive: false,
            events: Vec::new(),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn is_defensive(&self) -> bool {
        self.defensive
    }

    pub fn events(&self) -> &[RiskEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<RiskEvent> {
        self.events
    }

    fn record(&mut self, date: NaiveDate, kind: RiskEventKind, symbol: Option<Symbol>, detail: String) {
        tracing::info!(%date, ?kind, symbol = ?symbol, %detail, "Risk action");
        self.events.push(RiskEvent {
            date,
            kind,
            symbol,
            detail,
        });
    }

    /// Track the running peak and flip defensive mode on breach / recovery.
    pub fn assess_drawdown(&mut self, date: NaiveDate, current_value: f64) -> DrawdownStatus {
        if current_value > self.peak_value {
            self.peak_value = current_value;
            if self.defensive {
                // New peak means full recovery.
                self.defensive = false;
                tracing::info!(%date, value = current_value, "Recovered to new peak, exiting defensive mode");
            }
        }

        let drawdown = if self.peak_value > 0.0 {
            (current_value - self.peak_value) / self.peak_value
        } else {
            0.0
        };

        if drawdown < -self.limits.max_drawdown && !self.defensive {
            self.defensive = true;
            self.record(
                date,
                RiskEventKind::DrawdownProtection,
                None,
                format!(
                    "drawdown {:.1}% breached {:.1}% limit; raising cash to {:.0}%",
                    drawdown * 100.0,
                    self.limits.max_drawdown * 100.0,
                    self.limits.cash_buffer_on_drawdown * 100.0
                ),
            );
        }

        DrawdownStatus {
            drawdown,
            defensive: self.defensive,
            cash_allocation: if self.defensive {
                self.limits.cash_buffer_on_drawdown
            } else {
                0.0
            },
        }
    }

    /// Ratchet every position's peak price, then collect trailing-stop
    /// violations. The stop fires on drop-from-peak, not drop-from-entry.
    pub fn check_stops<F>(
        &mut self,
        date: NaiveDate,
        positions: &mut [Position],
        price_of: F,
    ) -> Vec<StopOut>
    where
        F: Fn(&Symbol) -> Option<f64>,
    {
        let mut stop_outs = Vec::new();

        for position in positions.iter_mut() {
            let Some(price) = price_of(&position.symbol) else {
                continue;
            };
            if price > position.peak_price {
                position.peak_price = price;
            }
            if position.peak_price <= 0.0 {
                continue;
            }
            let drop_from_peak = (price - position.peak_price) / position.peak_price;
            let threshold = position.quality_tier.stop_threshold(&self.limits);
            if drop_from_peak < -threshold {
                self.record(
                    date,
                    RiskEventKind::StopLoss,
                    Some(position.symbol.clone()),
                    format!(
                        "{:?} quality stop: peak {:.2} -> {:.2} ({:.1}%, threshold -{:.0}%)",
                        position.quality_tier,
                        position.peak_price,
                        price,
                        drop_from_peak * 100.0,
                        threshold * 100.0
                    ),
                );
                stop_outs.push(StopOut {
                    symbol: position.symbol.clone(),
                    price,
                    drop_from_peak,
                    tier: position.quality_tier,
                });
            }
        }

        stop_outs
    }

    /// Size multiplier given realized portfolio volatility.
    pub fn volatility_scale(&mut self, date: NaiveDate, realized_vol: f64) -> f64 {
        if realized_vol > self.limits.max_volatility {
            self.record(
                date,
                RiskEventKind::VolatilityScale,
                None,
                format!(
                    "realized vol {:.1}% above {:.1}% ceiling; scaling targets by {:.2}",
                    realized_vol * 100.0,
                    self.limits.max_volatility * 100.0,
                    self.limits.volatility_scale_factor
                ),
            );
            self.limits.volatility_scale_factor
        } else {
            1.0
        }
    }

    /// Clip per-symbol weights to the position cap, preserving the total
    /// allocation by renormalizing the clipped vector.
    pub fn apply_position_caps(&mut self, date: NaiveDate, weights: &mut BTreeMap<Symbol, f64>) {
        let total_before: f64 = weights.values().sum();
        if total_before <= 0.0 {
            return;
        }

        let violators: Vec<Symbol> = weights
            .iter()
            .filter(|(_, w)| **w > self.limits.max_position_size)
            .map(|(s, _)| s.clone())
            .collect();
        if violators.is_empty() {
            return;
        }

        for symbol in &violators {
            let weight = weights[symbol];
            self.record(
                date,
                RiskEventKind::PositionCap,
                Some(symbol.clone()),
                format!(
                    "position {:.1}% clipped to {:.1}% cap",
                    weight * 100.0,
                    self.limits.max_position_size * 100.0
                ),
            );
            weights.insert(symbol.clone(), self.limits.max_position_size);
        }

        // Renormalize so the clipped vector still allocates the same total.
        let total_after: f64 = weights.values().sum();
        if total_after > 0.0 {
            let scale = total_before.min(1.0) / total_after;
            for weight in weights.values_mut() {
                *weight *= scale;
            }
        }
    }

    /// Scale down sectors above the concentration cap, proportionally
    /// across their symbols.
    pub fn apply_sector_caps(
        &mut self,
        date: NaiveDate,
        weights: &mut BTreeMap<Symbol, f64>,
        sectors: &BTreeMap<Symbol, String>,
    ) {
        let mut exposure: BTreeMap<&str, f64> = BTreeMap::new();
        for (symbol, weight) in weights.iter() {
            let sector = sectors.get(symbol).map_or("Unknown", String::as_str);
            *exposure.entry(sector).or_insert(0.0) += *weight;
        }

        for (sector, total) in exposure {
            if total <= self.limits.max_sector_concentration {
                continue;
            }
            let scale = self.limits.max_sector_concentration / total;
            self.record(
                date,
                RiskEventKind::SectorCap,
                None,
                format!(
                    "sector {sector} at {:.1}% scaled down to {:.1}% cap",
                    total * 100.0,
                    self.limits.max_sector_concentration * 100.0
                ),
            );
            for (symbol, weight) in weights.iter_mut() {
                let symbol_sector = sectors.get(symbol).map_or("Unknown", String::as_str);
                if symbol_sector == sector {
                    *weight *= scale;
                }
            }
        }
    }
}
