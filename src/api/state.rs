use std::sync::Arc;

use crate::accounts::ConfigStore;
use crate::aggregate::Aggregator;
use crate::prices::CachedPrices;
use crate::tokens::TokenStore;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub tokens: Arc<TokenStore>,
    pub config: Arc<ConfigStore>,
    pub prices: Arc<CachedPrices>,
}
