//! Minor-unit money arithmetic and fixed-scale unit quantities.
//!
//! Money is always `i64` minor units (cents). Unit quantities are
//! [`Decimal`]s capped at a configured number of fractional digits. Every
//! conversion from a decimal product back to minor units goes through
//! [`to_minor_units`], which rounds half to even.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Integer amount in the smallest currency unit.
pub type MinorUnits = i64;

/// Fractional digits kept on unit quantities unless configured otherwise.
pub const DEFAULT_QUANTITY_SCALE: u32 = 8;

/// Round to whole minor units (banker's rounding). `None` on overflow.
pub fn to_minor_units(value: Decimal) -> Option<MinorUnits> {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
}

/// `quantity * price`, rounded to minor units.
pub fn extend(quantity: Decimal, price: MinorUnits) -> Option<MinorUnits> {
    quantity
        .checked_mul(Decimal::from(price))
        .and_then(to_minor_units)
}

/// `amount * numerator / denominator` without truncating the intermediate
/// ratio, rounded to minor units.
pub fn prorate(amount: MinorUnits, numerator: Decimal, denominator: Decimal) -> Option<MinorUnits> {
    if denominator.is_zero() {
        return None;
    }
    Decimal::from(amount)
        .checked_mul(numerator)?
        .checked_div(denominator)
        .and_then(to_minor_units)
}

/// True when `quantity` has no more than `scale` significant fractional digits.
pub fn fits_scale(quantity: Decimal, scale: u32) -> bool {
    quantity.normalize().scale() <= scale
}

/// Round a derived quantity (e.g. after a split) back onto the unit scale.
pub fn round_quantity(quantity: Decimal, scale: u32) -> Decimal {
    quantity
        .round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven)
        .normalize()
}

/// Render minor units with a decimal point and thousands separators,
/// e.g. `-123456` with 2 decimals becomes `-1,234.56`.
pub fn format_minor_units(amount: MinorUnits, decimals: u32) -> String {
    let negative = amount < 0;
    let digits = amount.unsigned_abs().to_string();
    let decimals = decimals as usize;
    let (int_part, frac_part) = if digits.len() > decimals {
        digits.split_at(digits.len() - decimals)
    } else {
        ("0", digits.as_str())
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        let remaining = int_part.len() - i;
        if i > 0 && remaining % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&grouped);
    if decimals > 0 {
        out.push('.');
        for _ in frac_part.len()..decimals {
            out.push('0');
        }
        out.push_str(frac_part);
    }
    out
}
