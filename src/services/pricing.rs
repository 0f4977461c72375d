//! Pricing snapshot: line totals, shipping and grand total computed from a
//! cart at the moment of checkout. Pure; no storage access.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::ServiceError;

/// One cart line with the live catalog price read at checkout time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricingSnapshot {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub grand_total: Decimal,
}

/// Inputs a shipping policy may price on
#[derive(Debug, Clone, Copy)]
pub struct ShippingContext<'a> {
    pub shipping_address: &'a str,
    pub subtotal: Decimal,
    pub item_count: u32,
}

/// Shipping cost as a function of the order being placed
pub trait ShippingPolicy: Send + Sync {
    fn shipping_cost(&self, ctx: &ShippingContext<'_>) -> Decimal;
}

/// Same cost for every order
#[derive(Debug, Clone, Copy)]
pub struct FlatRateShipping {
    rate: Decimal,
}

impl FlatRateShipping {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

impl ShippingPolicy for FlatRateShipping {
    fn shipping_cost(&self, _ctx: &ShippingContext<'_>) -> Decimal {
        self.rate
    }
}

/// Prices `lines` and adds shipping. Fails with `EmptyCart` when there is
/// nothing to buy.
pub fn snapshot(
    lines: &[CartLine],
    shipping_address: &str,
    shipping: &dyn ShippingPolicy,
) -> Result<PricingSnapshot, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::EmptyCart);
    }

    let mut priced = Vec::with_capacity(lines.len());
    let mut subtotal = Decimal::ZERO;
    let mut item_count: u32 = 0;

    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for product {} must be at least 1",
                line.product_id
            )));
        }
        let line_total = (line.unit_price * Decimal::from(line.quantity)).round_dp(2);
        subtotal += line_total;
        item_count = item_count.saturating_add(line.quantity as u32);
        priced.push(PricedLine {
            product_id: line.product_id,
            name: line.name.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
            line_total,
        });
    }

    let shipping_cost = shipping
        .shipping_cost(&ShippingContext {
            shipping_address,
            subtotal,
            item_count,
        })
        .round_dp(2);

    Ok(PricingSnapshot {
        lines: priced,
        subtotal,
        shipping_cost,
        grand_total: subtotal + shipping_cost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, quantity: i32) -> CartLine {
        CartLine {
            product_id: Uuid::new_v4(),
            name: "Widget".into(),
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn prices_reference_cart() {
        let shipping = FlatRateShipping::new(dec!(1.35));
        let snap = snapshot(
            &[line(dec!(10.00), 2), line(dec!(5.00), 1)],
            "1 Main St",
            &shipping,
        )
        .unwrap();

        assert_eq!(snap.subtotal, dec!(25.00));
        assert_eq!(snap.shipping_cost, dec!(1.35));
        assert_eq!(snap.grand_total, dec!(26.35));
        assert_eq!(snap.lines[0].line_total, dec!(20.00));
    }

    #[test]
    fn empty_cart_is_rejected() {
        let shipping = FlatRateShipping::new(dec!(1.35));
        assert_matches!(
            snapshot(&[], "1 Main St", &shipping),
            Err(ServiceError::EmptyCart)
        );
    }

    #[test]
    fn shipping_policy_sees_subtotal() {
        struct FreeOverFifty;
        impl ShippingPolicy for FreeOverFifty {
            fn shipping_cost(&self, ctx: &ShippingContext<'_>) -> Decimal {
                if ctx.subtotal >= dec!(50) {
                    Decimal::ZERO
                } else {
                    dec!(4.99)
                }
            }
        }

        let snap = snapshot(&[line(dec!(25.00), 2)], "addr", &FreeOverFifty).unwrap();
        assert_eq!(snap.grand_total, dec!(50.00));
    }

    proptest! {
        #[test]
        fn grand_total_is_lines_plus_shipping(
            cents in prop::collection::vec((1i64..100_000, 1i32..50), 1..8),
            shipping_cents in 0i64..5_000,
        ) {
            let lines: Vec<CartLine> = cents
                .iter()
                .map(|(price, qty)| line(Decimal::new(*price, 2), *qty))
                .collect();
            let shipping = FlatRateShipping::new(Decimal::new(shipping_cents, 2));
            let snap = snapshot(&lines, "addr", &shipping).unwrap();

            let expected: Decimal = lines
                .iter()
                .map(|l| l.unit_price * Decimal::from(l.quantity))
                .sum::<Decimal>()
                + Decimal::new(shipping_cents, 2);
            prop_assert_eq!(snap.grand_total, expected);
            prop_assert_eq!(snap.subtotal + snap.shipping_cost, snap.grand_total);
        }
    }
}
