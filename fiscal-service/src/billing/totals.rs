//! Invoice arithmetic.
//!
//! Rounding is round-half-up to two decimals, applied to every line total
//! before aggregation and again to each invoice-level component. Every
//! operation is checked: amounts that leave the storable range are rejected
//! as [`FiscalError::InvalidAmount`].

use rust_decimal::{Decimal, RoundingStrategy};

use super::error::FiscalError;
use crate::models::{DiscountPolicy, LineItemInput, PricedLine};

pub const CURRENCY_SCALE: u32 = 2;

/// Decimals kept for line prices, discounts and taxes.
pub const LINE_PRICE_SCALE: u32 = 4;

/// Exclusive upper bound of any stored amount (`NUMERIC(14, 2)`).
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0xD4A5_1000, 0xE8, 0, false, 0);

/// Half a cent: payments within this of the total settle the invoice.
pub const SETTLEMENT_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

const ONE_HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Round to currency precision using half-up (commercial) rounding.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// True when `value` carries no more than two decimals.
pub fn has_currency_precision(value: Decimal) -> bool {
    value.normalize().scale() <= CURRENCY_SCALE
}

/// Reject amounts at or above [`MAX_AMOUNT`].
pub fn ensure_storable(what: &str, value: Decimal) -> Result<Decimal, FiscalError> {
    if value >= MAX_AMOUNT {
        return Err(FiscalError::InvalidAmount(format!(
            "{} {} must be below {}",
            what, value, MAX_AMOUNT
        )));
    }
    Ok(value)
}

fn overflow(what: &str) -> FiscalError {
    FiscalError::InvalidAmount(format!("{} is out of range", what))
}

fn checked_add(a: Decimal, b: Decimal, what: &str) -> Result<Decimal, FiscalError> {
    a.checked_add(b).ok_or_else(|| overflow(what))
}

fn checked_sub(a: Decimal, b: Decimal, what: &str) -> Result<Decimal, FiscalError> {
    a.checked_sub(b).ok_or_else(|| overflow(what))
}

fn checked_mul(a: Decimal, b: Decimal, what: &str) -> Result<Decimal, FiscalError> {
    a.checked_mul(b).ok_or_else(|| overflow(what))
}

/// Derived amounts of an invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceTotals {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub other_taxes: Decimal,
    pub total: Decimal,
}

impl InvoiceTotals {
    /// `total == round(subtotal - discount + tax + other_taxes)`.
    pub fn reconciles(&self) -> bool {
        self.subtotal
            .checked_sub(self.discount)
            .and_then(|v| v.checked_add(self.tax))
            .and_then(|v| v.checked_add(self.other_taxes))
            .is_some_and(|expected| self.total == round_currency(expected))
    }
}

/// Price a single line: `quantity * unit_price - discount + tax`, rounded.
pub fn price_line(line: &LineItemInput) -> Result<Decimal, FiscalError> {
    if line.quantity <= 0 {
        return Err(FiscalError::InvalidAmount(format!(
            "quantity must be at least 1 for '{}'",
            line.description
        )));
    }
    if line.unit_price < Decimal::ZERO {
        return Err(FiscalError::InvalidAmount(format!(
            "unit price {} is negative for '{}'",
            line.unit_price, line.description
        )));
    }
    if line.discount < Decimal::ZERO || line.tax < Decimal::ZERO {
        return Err(FiscalError::InvalidAmount(format!(
            "line discount and tax must not be negative for '{}'",
            line.description
        )));
    }
    for (what, value) in [
        ("unit price", line.unit_price),
        ("line discount", line.discount),
        ("line tax", line.tax),
    ] {
        if value.normalize().scale() > LINE_PRICE_SCALE {
            return Err(FiscalError::InvalidAmount(format!(
                "{} {} has more than {} decimals for '{}'",
                what, value, LINE_PRICE_SCALE, line.description
            )));
        }
        ensure_storable(what, value)?;
    }

    let gross = checked_mul(Decimal::from(line.quantity), line.unit_price, "line amount")?;
    let net = checked_sub(gross, line.discount, "line amount")?;
    let line_total = round_currency(checked_add(net, line.tax, "line amount")?);
    if line_total < Decimal::ZERO {
        return Err(FiscalError::InvalidAmount(format!(
            "discount {} exceeds line amount {} for '{}'",
            line.discount, gross, line.description
        )));
    }
    ensure_storable("line total", line_total)
}

/// Compute every invoice amount from its lines.
///
/// Validation happens here, before anything is persisted.
pub fn compute_totals(
    lines: &[LineItemInput],
    discount: DiscountPolicy,
    tax_rate: Decimal,
    other_taxes: Decimal,
) -> Result<InvoiceTotals, FiscalError> {
    if lines.is_empty() {
        return Err(FiscalError::EmptyInvoice);
    }
    if tax_rate < Decimal::ZERO || tax_rate > Decimal::ONE {
        return Err(FiscalError::InvalidAmount(format!(
            "tax rate {} must be between 0 and 1",
            tax_rate
        )));
    }
    if other_taxes < Decimal::ZERO {
        return Err(FiscalError::InvalidAmount(format!(
            "other taxes {} must not be negative",
            other_taxes
        )));
    }
    let other_taxes = ensure_storable("other taxes", round_currency(other_taxes))?;

    let mut priced = Vec::with_capacity(lines.len());
    let mut subtotal = Decimal::ZERO;
    for line in lines {
        let line_total = price_line(line)?;
        subtotal = checked_add(subtotal, line_total, "subtotal")?;
        priced.push(PricedLine {
            input: line.clone(),
            line_total,
        });
    }
    let subtotal = ensure_storable("subtotal", subtotal)?;

    let discount = match discount {
        DiscountPolicy::None => Decimal::ZERO,
        DiscountPolicy::Fixed(amount) => {
            if amount < Decimal::ZERO {
                return Err(FiscalError::InvalidAmount(format!(
                    "discount {} must not be negative",
                    amount
                )));
            }
            round_currency(amount)
        }
        DiscountPolicy::Percentage(pct) => {
            if pct < Decimal::ZERO || pct > ONE_HUNDRED {
                return Err(FiscalError::InvalidAmount(format!(
                    "discount percentage {} must be between 0 and 100",
                    pct
                )));
            }
            let scaled = checked_mul(subtotal, pct, "discount")?;
            round_currency(scaled / ONE_HUNDRED)
        }
    };
    if discount > subtotal {
        return Err(FiscalError::InvalidAmount(format!(
            "discount {} exceeds subtotal {}",
            discount, subtotal
        )));
    }

    let taxable = checked_sub(subtotal, discount, "taxable amount")?;
    let tax = round_currency(checked_mul(taxable, tax_rate, "tax")?);
    let total = checked_add(checked_add(taxable, tax, "total")?, other_taxes, "total")?;
    let total = ensure_storable("total", round_currency(total))?;

    Ok(InvoiceTotals {
        lines: priced,
        subtotal,
        discount,
        tax,
        other_taxes,
        total,
    })
}
