//! Property-based tests for amortization exactness

use chrono::{TimeZone, Utc};
use credit_engine::{build_schedule, monthly_payment};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn principal_strategy() -> impl Strategy<Value = Decimal> {
    (100_000i64..1_000_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn rate_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..6_000i64).prop_map(|bp| Decimal::new(bp, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Principal components sum to the principal; every row is principal + interest
    #[test]
    fn prop_schedule_amortizes_exactly(
        principal in principal_strategy(),
        rate in rate_strategy(),
        term in 6u32..=60,
    ) {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let payment = monthly_payment(principal, rate, term).unwrap();
        let rows = build_schedule(principal, rate, term, payment, start).unwrap();

        prop_assert_eq!(rows.len(), term as usize);
        let total: Decimal = rows.iter().map(|r| r.principal).sum();
        prop_assert_eq!(total, principal);

        let mut remaining = principal;
        for (index, row) in rows.iter().enumerate() {
            prop_assert_eq!(row.payment_number as usize, index + 1);
            prop_assert_eq!(row.amount, row.principal + row.interest);
            prop_assert!(row.principal >= Decimal::ZERO);
            prop_assert!(row.interest >= Decimal::ZERO);
            prop_assert!(row.amount.scale() <= 2);
            if index + 1 < rows.len() {
                prop_assert_eq!(row.amount, payment);
            } else {
                prop_assert_eq!(row.principal, remaining);
            }
            remaining -= row.principal;
        }
        prop_assert_eq!(remaining, Decimal::ZERO);
        prop_assert!(rows.windows(2).all(|w| w[0].due_date < w[1].due_date));
    }
}
