use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::PortfolioError;
use crate::instrument::Instrument;

/// A holding of one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Instrument,
    pub quantity: Decimal,
}

impl Position {
    pub fn new(instrument: impl Into<Instrument>, quantity: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            quantity,
        }
    }

    pub fn instrument_id(&self) -> &str {
        self.instrument.id()
    }

    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}

/// Ordered positions plus a cash balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub name: String,
    pub positions: Vec<Position>,
    pub cash: Decimal,
    /// When false every quantity must be non-negative.
    pub allow_short: bool,
}

impl Portfolio {
    pub fn new(name: &str, cash: Decimal) -> Self {
        Self {
            name: name.to_string(),
            positions: Vec::new(),
            cash,
            allow_short: false,
        }
    }

    pub fn with_short_positions(mut self) -> Self {
        self.allow_short = true;
        self
    }

    /// Append a position, rejecting duplicates and disallowed shorts.
    pub fn add_position(
        &mut self,
        instrument: impl Into<Instrument>,
        quantity: Decimal,
    ) -> Result<(), PortfolioError> {
        let position = Position::new(instrument, quantity);
        if self
            .positions
            .iter()
            .any(|p| p.instrument_id() == position.instrument_id())
        {
            return Err(PortfolioError::DuplicateInstrument {
                instrument: position.instrument_id().to_string(),
            });
        }
        self.check_quantity(&position)?;
        self.positions.push(position);
        Ok(())
    }

    /// Builder-style variant of [`Portfolio::add_position`].
    pub fn with_position(
        mut self,
        instrument: impl Into<Instrument>,
        quantity: Decimal,
    ) -> Result<Self, PortfolioError> {
        self.add_position(instrument, quantity)?;
        Ok(self)
    }

    /// Re-check every invariant; used by consumers that received the
    /// portfolio from outside (e.g. deserialized).
    pub fn validate(&self) -> Result<(), PortfolioError> {
        if self.positions.is_empty() {
            return Err(PortfolioError::Empty);
        }
        let mut seen = HashSet::new();
        for position in &self.positions {
            if !seen.insert(position.instrument_id()) {
                return Err(PortfolioError::DuplicateInstrument {
                    instrument: position.instrument_id().to_string(),
                });
            }
            self.check_quantity(position)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn instrument_ids(&self) -> Vec<&str> {
        self.positions.iter().map(|p| p.instrument_id()).collect()
    }

    pub fn index_of(&self, instrument_id: &str) -> Option<usize> {
        self.positions
            .iter()
            .position(|p| p.instrument_id() == instrument_id)
    }

    fn check_quantity(&self, position: &Position) -> Result<(), PortfolioError> {
        if position.is_short() && !self.allow_short {
            return Err(PortfolioError::NegativeQuantity {
                instrument: position.instrument_id().to_string(),
                quantity: position.quantity,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::FutureTerms;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn future(id: &str) -> FutureTerms {
        let maturity = NaiveDate::from_ymd_opt(2026, 12, 18).unwrap();
        FutureTerms::new(id, "SPX", maturity, dec!(50), dec!(5000))
    }

    #[test]
    fn test_add_position() {
        let mut p = Portfolio::new("test", dec!(10_000));
        p.add_position(future("ESZ6"), dec!(2)).unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.index_of("ESZ6"), Some(0));
        assert!(p.positions[0].is_long());
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut p = Portfolio::new("test", dec!(0));
        p.add_position(future("ESZ6"), dec!(1)).unwrap();
        let err = p.add_position(future("ESZ6"), dec!(1)).unwrap_err();
        assert_eq!(
            err,
            PortfolioError::DuplicateInstrument {
                instrument: "ESZ6".into()
            }
        );
    }

    #[test]
    fn test_short_requires_opt_in() {
        let mut long_only = Portfolio::new("long", dec!(0));
        assert!(matches!(
            long_only.add_position(future("ESZ6"), dec!(-1)),
            Err(PortfolioError::NegativeQuantity { .. })
        ));

        let short = Portfolio::new("short", dec!(0))
            .with_short_positions()
            .with_position(future("ESZ6"), dec!(-1))
            .unwrap();
        assert!(short.positions[0].is_short());
        assert!(short.validate().is_ok());
    }

    #[test]
    fn test_validate_catches_tampered_portfolio() {
        let mut p = Portfolio::new("test", dec!(0));
        assert_eq!(p.validate(), Err(PortfolioError::Empty));
        p.add_position(future("ESZ6"), dec!(1)).unwrap();
        p.positions.push(Position::new(future("ESH7"), dec!(-3)));
        assert!(matches!(
            p.validate(),
            Err(PortfolioError::NegativeQuantity { .. })
        ));
    }
}
