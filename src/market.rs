use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One coin as returned by `GET /api/markets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub price: f64,
    /// Signed 24h change in percent. `null` when the provider omits it.
    #[serde(rename = "change24h")]
    pub change_24h: Option<f64>,
    pub image: String,
}

/// A row of the CoinGecko `coins/markets` payload. Only the fields we forward
/// are read; everything is optional here so that validation happens in one place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamCoin {
    pub id: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub current_price: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {index} is missing `{field}`")]
pub struct InvalidRecord {
    pub index: usize,
    pub field: &'static str,
}

fn required<T>(v: Option<T>, index: usize, field: &'static str) -> Result<T, InvalidRecord> {
    v.ok_or(InvalidRecord { index, field })
}

impl UpstreamCoin {
    pub fn into_snapshot(self, index: usize) -> Result<MarketSnapshot, InvalidRecord> {
        let id = required(self.id.filter(|s| !s.trim().is_empty()), index, "id")?;
        let name = required(self.name, index, "name")?;
        let symbol = required(self.symbol, index, "symbol")?;
        let price = required(self.current_price.filter(|p| p.is_finite()), index, "current_price")?;
        let image = required(self.image, index, "image")?;

        Ok(MarketSnapshot {
            id,
            name,
            symbol: symbol.to_uppercase(),
            price,
            change_24h: self.price_change_percentage_24h.filter(|c| c.is_finite()),
            image,
        })
    }
}

/// Maps the upstream page in provider order. One bad record fails the whole page.
pub fn to_snapshots(coins: Vec<UpstreamCoin>) -> Result<Vec<MarketSnapshot>, InvalidRecord> {
    coins
        .into_iter()
        .enumerate()
        .map(|(i, c)| c.into_snapshot(i))
        .collect()
}
