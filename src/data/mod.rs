pub mod bundle;
pub mod historical;
pub mod indicators;
pub mod storage;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::data::bundle::{Bar, DataBundle, Symbol};

/// Provider failures. `UnknownSymbol` maps to a 404 at the API edge;
/// `Unavailable` to a 503.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Abstract market-data source.
///
/// Implementations must be internally thread-safe and point-in-time correct:
/// a call with `as_of = Some(d)` must not expose any observation after `d`.
/// Missing fields are returned as absent values inside the bundle, never as
/// errors; only catastrophic failure errors.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Full bundle for a symbol: point-in-time when `as_of` is supplied,
    /// latest otherwise.
    async fn comprehensive(
        &self,
        symbol: &Symbol,
        as_of: Option<NaiveDate>,
    ) -> Result<DataBundle, ProviderError>;

    /// OHLCV history for `[start, end]` inclusive.
    async fn history(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, ProviderError>;

    /// Short variant name recorded in backtest metadata.
    fn variant(&self) -> &'static str {
        "provider"
    }
}
