//! Annuity payment and amortization schedule
//!
//! With monthly rate `r = annual / 12 / 100` and term `n`:
//!
//! ```text
//! payment = P * r * (1 + r)^n / ((1 + r)^n - 1)
//! ```
//!
//! Each row charges `interest = remaining * r` (rounded to kopecks) and
//! repays `payment - interest` of principal. The final row repays whatever
//! principal is left, so the principal components always sum to `P`.

use chrono::{DateTime, Months, Utc};
use ledger_core::round_money;
use rust_decimal::Decimal;

use crate::{Error, Result};

/// One computed installment, before it is persisted
#[derive(Debug, Clone, PartialEq)]
pub struct Installment {
    /// 1-based installment number
    pub payment_number: u32,

    /// Due date (`start + payment_number` months)
    pub due_date: DateTime<Utc>,

    /// `principal + interest`
    pub amount: Decimal,

    /// Principal repaid by this installment
    pub principal: Decimal,

    /// Interest charged by this installment
    pub interest: Decimal,
}

/// Monthly rate as a fraction
pub fn monthly_rate(annual_rate_percent: Decimal) -> Result<Decimal> {
    annual_rate_percent
        .checked_div(Decimal::from(1200))
        .ok_or_else(|| Error::Arithmetic(format!("rate {} out of range", annual_rate_percent)))
}

/// Fixed annuity installment, rounded to kopecks.
///
/// A zero rate degenerates to `principal / term`.
pub fn monthly_payment(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
) -> Result<Decimal> {
    if term_months == 0 {
        return Err(Error::Arithmetic("term must be positive".to_string()));
    }
    if annual_rate_percent < Decimal::ZERO {
        return Err(Error::Arithmetic(format!(
            "negative rate {}",
            annual_rate_percent
        )));
    }

    let n = Decimal::from(term_months);
    let r = monthly_rate(annual_rate_percent)?;
    if r.is_zero() {
        return Ok(round_money(principal / n));
    }

    let growth = compound(Decimal::ONE + r, term_months)?;
    let overflow = || Error::Arithmetic(format!("payment overflow for principal {}", principal));

    let numerator = principal
        .checked_mul(r)
        .and_then(|v| v.checked_mul(growth))
        .ok_or_else(overflow)?;
    let denominator = growth - Decimal::ONE;
    let payment = numerator.checked_div(denominator).ok_or_else(overflow)?;

    Ok(round_money(payment))
}

/// `base^exp` by repeated multiplication
fn compound(base: Decimal, exp: u32) -> Result<Decimal> {
    let mut acc = Decimal::ONE;
    for _ in 0..exp {
        acc = acc
            .checked_mul(base)
            .ok_or_else(|| Error::Arithmetic(format!("{}^{} overflows", base, exp)))?;
    }
    Ok(acc)
}

/// Full amortization schedule for a credit starting at `start`
pub fn build_schedule(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
    payment: Decimal,
    start: DateTime<Utc>,
) -> Result<Vec<Installment>> {
    let r = monthly_rate(annual_rate_percent)?;
    let mut remaining = principal;
    let mut rows = Vec::with_capacity(term_months as usize);

    for number in 1..=term_months {
        let interest = round_money(remaining * r);
        let principal_part = if number == term_months {
            remaining
        } else {
            // Rounded payments can over-amortize tiny loans
            (payment - interest).max(Decimal::ZERO).min(remaining)
        };

        let due_date = start
            .checked_add_months(Months::new(number))
            .ok_or_else(|| Error::Arithmetic(format!("due date of installment {} overflows", number)))?;

        rows.push(Installment {
            payment_number: number,
            due_date,
            amount: principal_part + interest,
            principal: principal_part,
            interest,
        });
        remaining -= principal_part;
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payment_at_26_percent() {
        assert_eq!(
            monthly_payment(dec!(100000), dec!(26), 12).unwrap(),
            dec!(9553.01)
        );
    }

    #[test]
    fn test_payment_at_27_percent() {
        assert_eq!(
            monthly_payment(dec!(100000), dec!(27), 12).unwrap(),
            dec!(9601.74)
        );
    }

    #[test]
    fn test_zero_rate_is_straight_line() {
        assert_eq!(monthly_payment(dec!(1200), dec!(0), 12).unwrap(), dec!(100));

        let start = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let rows = build_schedule(dec!(1000), dec!(0), 6, dec!(166.67), start).unwrap();
        assert!(rows.iter().all(|r| r.interest.is_zero()));
        assert_eq!(rows[5].principal, dec!(166.65));
        assert_eq!(rows.iter().map(|r| r.principal).sum::<Decimal>(), dec!(1000));
    }

    #[test]
    fn test_schedule_first_row_and_dates() {
        let start = Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap();
        let rows = build_schedule(dec!(100000), dec!(26), 12, dec!(9553.01), start).unwrap();

        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].interest, dec!(2166.67));
        assert_eq!(rows[0].principal, dec!(7386.34));
        assert_eq!(rows[0].amount, dec!(9553.01));
        // Month-end clamps
        assert_eq!(
            rows[0].due_date,
            Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
        );
        assert_eq!(
            rows[11].due_date,
            Utc.with_ymd_and_hms(2027, 1, 31, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(monthly_payment(dec!(1000), dec!(10), 0).is_err());
        assert!(monthly_payment(dec!(1000), dec!(-1), 12).is_err());
    }
}
