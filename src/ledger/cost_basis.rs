//! Weighted-average cost basis arithmetic.
//!
//! Everything here is pure: a [`Position`] and an [`Event`] go in, the next
//! position and the event's realized gain/loss come out. Rejected events leave
//! the input untouched.

use rust_decimal::Decimal;

use crate::error::{EngineError, Result};
use crate::models::Holding;
use crate::money::{self, MinorUnits};

/// The accounting state of a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub quantity: Decimal,
    pub cost_basis: MinorUnits,
    pub realized_gain_loss: MinorUnits,
}

impl Position {
    pub const EMPTY: Position = Position {
        quantity: Decimal::ZERO,
        cost_basis: 0,
        realized_gain_loss: 0,
    };

    pub fn of(holding: &Holding) -> Self {
        Self {
            quantity: holding.quantity,
            cost_basis: holding.cost_basis,
            realized_gain_loss: holding.realized_gain_loss,
        }
    }

    pub fn write_to(&self, holding: &mut Holding) {
        holding.quantity = self.quantity;
        holding.cost_basis = self.cost_basis;
        holding.realized_gain_loss = self.realized_gain_loss;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Buy {
        quantity: Decimal,
        price_per_unit: MinorUnits,
        fee: MinorUnits,
    },
    Sell {
        quantity: Decimal,
        price_per_unit: MinorUnits,
        fee: MinorUnits,
    },
    Split {
        ratio: Decimal,
    },
    /// Units received in place of cash, carrying `added_cost` of basis.
    UnitDividend {
        quantity: Decimal,
        added_cost: MinorUnits,
    },
    TransferOut {
        quantity: Decimal,
    },
    TransferIn {
        quantity: Decimal,
        cost_basis: MinorUnits,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub position: Position,
    /// `quantity * price_per_unit` for trades, zero otherwise.
    pub gross_amount: MinorUnits,
    /// Basis that left the position (sells and outgoing transfers).
    pub cost_removed: MinorUnits,
    pub realized_gain_loss: MinorUnits,
}

fn overflow() -> EngineError {
    EngineError::validation("amount exceeds the representable range")
}

fn add(a: MinorUnits, b: MinorUnits) -> Result<MinorUnits> {
    a.checked_add(b).ok_or_else(overflow)
}

fn sub(a: MinorUnits, b: MinorUnits) -> Result<MinorUnits> {
    a.checked_sub(b).ok_or_else(overflow)
}

/// Share of `position`'s basis carried by `quantity` units. Taking the whole
/// position takes the whole basis, so nothing is left behind by rounding.
fn cost_of(position: &Position, quantity: Decimal) -> Result<MinorUnits> {
    if quantity == position.quantity {
        return Ok(position.cost_basis);
    }
    money::prorate(position.cost_basis, quantity, position.quantity).ok_or_else(overflow)
}

fn take(position: &Position, quantity: Decimal) -> Result<(Decimal, MinorUnits)> {
    if quantity > position.quantity {
        return Err(EngineError::InsufficientShares {
            requested: quantity,
            held: position.quantity,
        });
    }
    Ok((position.quantity - quantity, cost_of(position, quantity)?))
}

/// Apply one event. `scale` is the number of fractional digits quantities are
/// kept to; it only matters for splits, whose product may need rounding.
pub fn apply(position: &Position, event: &Event, scale: u32) -> Result<Applied> {
    let mut next = *position;
    let mut gross_amount = 0;
    let mut cost_removed = 0;
    let mut realized = 0;

    match *event {
        Event::Buy {
            quantity,
            price_per_unit,
            fee,
        } => {
            gross_amount = money::extend(quantity, price_per_unit).ok_or_else(overflow)?;
            next.quantity += quantity;
            next.cost_basis = add(add(next.cost_basis, gross_amount)?, fee)?;
        }
        Event::Sell {
            quantity,
            price_per_unit,
            fee,
        } => {
            let (remaining, removed) = take(position, quantity)?;
            gross_amount = money::extend(quantity, price_per_unit).ok_or_else(overflow)?;
            realized = sub(sub(gross_amount, fee)?, removed)?;
            cost_removed = removed;
            next.quantity = remaining;
            next.cost_basis = position.cost_basis - removed;
            next.realized_gain_loss = add(next.realized_gain_loss, realized)?;
        }
        Event::Split { ratio } => {
            let product = position.quantity.checked_mul(ratio).ok_or_else(overflow)?;
            next.quantity = money::round_quantity(product, scale);
            if next.quantity.is_zero() && position.cost_basis != 0 {
                return Err(EngineError::validation(format!(
                    "split ratio {ratio} would reduce {} units to zero",
                    position.quantity
                )));
            }
        }
        Event::UnitDividend {
            quantity,
            added_cost,
        } => {
            next.quantity += quantity;
            next.cost_basis = add(next.cost_basis, added_cost)?;
        }
        Event::TransferOut { quantity } => {
            let (remaining, removed) = take(position, quantity)?;
            cost_removed = removed;
            next.quantity = remaining;
            next.cost_basis = position.cost_basis - removed;
        }
        Event::TransferIn {
            quantity,
            cost_basis,
        } => {
            next.quantity += quantity;
            next.cost_basis = add(next.cost_basis, cost_basis)?;
        }
    }

    debug_assert!(next.quantity >= Decimal::ZERO && next.cost_basis >= 0);
    debug_assert!(!next.quantity.is_zero() || next.cost_basis == 0);

    Ok(Applied {
        position: next,
        gross_amount,
        cost_removed,
        realized_gain_loss: realized,
    })
}
