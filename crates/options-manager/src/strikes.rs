//! Strike selection: ATM straddles and premium-targeted strangles.

use std::time::Duration;

use daily_short_core::PairKind;
use daily_short_fivepaisa::{OptionChain, OptionType, ScripSymbol, Strike};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::context::TradingContext;
use crate::error::{ManagerError, Result};
use crate::retry::{retry_transient, Backoff};
use crate::types::StrikePair;

const CHAIN_RETRY_BASE: Duration = Duration::from_millis(500);
const CHAIN_RETRY_MAX: Duration = Duration::from_secs(8);

/// Picks strikes from the nearest-expiry chain. Holds no state beyond the
/// shared context; every call fetches a fresh chain.
#[derive(Debug, Clone)]
pub struct StrikesManager {
    ctx: TradingContext,
}

impl StrikesManager {
    #[must_use]
    pub fn new(ctx: TradingContext) -> Self {
        Self { ctx }
    }

    /// Nearest-expiry chain, retrying transient failures.
    pub async fn chain(&self, index: &str) -> Result<OptionChain> {
        let backoff = Backoff::new(
            CHAIN_RETRY_BASE,
            CHAIN_RETRY_MAX,
            self.ctx.config.market_data_retries,
        );
        let gateway = &self.ctx.gateway;
        retry_transient("option_chain", backoff, || gateway.option_chain(index))
            .await
            .map_err(|e| match ManagerError::from(e) {
                ManagerError::TransientNetwork(msg) => ManagerError::MarketData(format!(
                    "option chain for {index} unavailable after retries: {msg}"
                )),
                other => other,
            })
    }

    /// CE and PE at the strike closest to spot.
    pub async fn straddle_strikes(&self, index: &str) -> Result<StrikePair> {
        let chain = self.chain(index).await?;
        let pair = select_straddle(&chain)?;
        info!(
            index,
            spot = %chain.spot,
            strike = %pair.call.strike_price,
            call_premium = %pair.call.premium,
            put_premium = %pair.put.premium,
            "Straddle strikes selected"
        );
        Ok(pair)
    }

    /// OTM CE and PE whose premiums are closest to `closest_price_thresh`.
    pub async fn strangle_strikes(
        &self,
        closest_price_thresh: Decimal,
        index: &str,
    ) -> Result<StrikePair> {
        let chain = self.chain(index).await?;
        let pair = select_strangle(&chain, closest_price_thresh)?;
        info!(
            index,
            spot = %chain.spot,
            threshold = %closest_price_thresh,
            call = %pair.call.display_name(),
            put = %pair.put.display_name(),
            "Strangle strikes selected"
        );
        Ok(pair)
    }

    /// Day of month of the nearest expiry.
    pub async fn expiry_day(&self, index: &str) -> Result<u32> {
        let chain = self.chain(index).await?;
        let quote = chain
            .quotes
            .first()
            .ok_or_else(|| ManagerError::MarketData(format!("empty option chain for {index}")))?;
        let symbol = ScripSymbol::parse(&quote.symbol)?;
        debug!(index, expiry_day = symbol.expiry_day, "Resolved expiry day");
        Ok(symbol.expiry_day)
    }
}

/// The ATM strike: closest to spot among strikes quoted on both sides.
/// Equidistant strikes resolve to the lower one.
pub fn select_straddle(chain: &OptionChain) -> Result<StrikePair> {
    let atm = chain
        .calls()
        .filter(|c| chain.quote(c.strike_price, OptionType::Put).is_some())
        .map(|c| c.strike_price)
        .min_by(|a, b| {
            let da = (*a - chain.spot).abs();
            let db = (*b - chain.spot).abs();
            da.cmp(&db).then(a.cmp(b))
        })
        .ok_or_else(|| ManagerError::StrikeNotFound {
            index: chain.index.clone(),
            threshold: chain.spot,
        })?;

    let call = chain.quote(atm, OptionType::Call);
    let put = chain.quote(atm, OptionType::Put);
    match (call, put) {
        (Some(call), Some(put)) => StrikePair::new(PairKind::Straddle, call.clone(), put.clone()),
        _ => Err(ManagerError::StrikeNotFound {
            index: chain.index.clone(),
            threshold: chain.spot,
        }),
    }
}

/// Per side, the OTM strike whose premium is closest to `threshold`.
pub fn select_strangle(chain: &OptionChain, threshold: Decimal) -> Result<StrikePair> {
    let mut calls: Vec<&Strike> = chain
        .calls()
        .filter(|s| s.strike_price > chain.spot)
        .collect();
    calls.sort_by(|a, b| a.strike_price.cmp(&b.strike_price));

    let mut puts: Vec<&Strike> = chain
        .puts()
        .filter(|s| s.strike_price < chain.spot)
        .collect();
    puts.sort_by(|a, b| b.strike_price.cmp(&a.strike_price));

    let not_found = || ManagerError::StrikeNotFound {
        index: chain.index.clone(),
        threshold,
    };
    let call = closest_premium(&calls, threshold).ok_or_else(not_found)?;
    let put = closest_premium(&puts, threshold).ok_or_else(not_found)?;

    StrikePair::new(PairKind::Strangle, call.clone(), put.clone())
}

/// First strike (in ladder order) with the minimum premium distance to
/// `threshold`. Untraded strikes are skipped.
pub fn closest_premium<'a>(ladder: &[&'a Strike], threshold: Decimal) -> Option<&'a Strike> {
    let mut best: Option<(&Strike, Decimal)> = None;
    for strike in ladder.iter().copied() {
        if strike.premium <= Decimal::ZERO {
            continue;
        }
        let distance = (strike.premium - threshold).abs();
        match best {
            Some((_, d)) if distance >= d => {}
            _ => best = Some((strike, distance)),
        }
    }
    best.map(|(s, _)| s)
}
