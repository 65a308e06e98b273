//! Scrip-name parser.
//!
//! 5paisa names index options as
//! `<INDEX> <DD> <Mon> <YYYY> <CE|PE> <strike>`, for example
//! `NIFTY 29 Dec 2022 CE 18000.00` or `BANKNIFTY 05 Jan 2023 PE 42500.00`.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, Result};
use crate::types::OptionType;

/// A parsed option scrip name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScripSymbol {
    pub index: String,
    pub expiry_day: u32,
    pub expiry: NaiveDate,
    pub option_type: OptionType,
    pub strike: Decimal,
}

impl ScripSymbol {
    /// Parses a scrip name.
    ///
    /// # Errors
    /// Returns [`BrokerError::InvalidSymbol`] if any component is missing or
    /// malformed; there is no partial result.
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split_whitespace().collect();
        let [index, day, month, year, option_type, strike] = parts.as_slice() else {
            return Err(BrokerError::invalid_symbol(
                name,
                format!("expected 6 fields, found {}", parts.len()),
            ));
        };

        if !index.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(BrokerError::invalid_symbol(name, "index must be alphanumeric"));
        }

        let date_text = format!("{day} {month} {year}");
        let expiry = NaiveDate::parse_from_str(&date_text, "%d %b %Y")
            .map_err(|e| BrokerError::invalid_symbol(name, format!("bad expiry '{date_text}': {e}")))?;

        let option_type = OptionType::from_code(option_type).ok_or_else(|| {
            BrokerError::invalid_symbol(name, format!("unknown option type '{option_type}'"))
        })?;

        let strike = Decimal::from_str(strike)
            .map_err(|e| BrokerError::invalid_symbol(name, format!("bad strike '{strike}': {e}")))?;
        if strike <= Decimal::ZERO {
            return Err(BrokerError::invalid_symbol(name, "strike must be positive"));
        }

        Ok(Self {
            index: index.to_ascii_uppercase(),
            expiry_day: expiry.day(),
            expiry,
            option_type,
            strike,
        })
    }
}

impl FromStr for ScripSymbol {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ScripSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {:.2}",
            self.index,
            self.expiry.format("%d %b %Y"),
            self.option_type,
            self.strike
        )
    }
}
