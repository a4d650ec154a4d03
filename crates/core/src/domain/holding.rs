use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_HOLDINGS: usize = 10;
pub const MAX_SYMBOL_LEN: usize = 50;
pub const MIN_INVESTMENT: f64 = 100.0;
pub const DEFAULT_INVESTMENT: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: Uuid,
    pub symbol: String,
    /// Allocation in percent, within (0, 100].
    pub weight: f64,
}

impl Holding {
    pub(crate) fn new(symbol: String, weight: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            weight,
        }
    }
}
