use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::commerce::cart_item;
use crate::integrations::{PriceQuote, PricedLine, PricingPolicy};

/// Rounds a money amount to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `unit_price × quantity`, exact.
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
}

/// Recomputes every total of a cart from its lines.
///
/// Tax and delivery fee come from the policy on each call; nothing is carried
/// over from a previous computation.
pub fn calculate_cart_totals(
    restaurant_id: Option<Uuid>,
    lines: &[PricedLine],
    policy: &dyn PricingPolicy,
) -> CartTotals {
    let subtotal: Decimal = lines
        .iter()
        .map(|line| line_total(line.unit_price, line.quantity))
        .sum();

    let PriceQuote { tax, delivery_fee } = policy.quote(restaurant_id, subtotal, lines);
    let tax = round_money(tax);
    let delivery_fee = round_money(delivery_fee);

    CartTotals {
        subtotal,
        tax,
        delivery_fee,
        total: subtotal + tax + delivery_fee,
    }
}

pub fn priced_lines(items: &[cart_item::Model]) -> Vec<PricedLine> {
    items
        .iter()
        .map(|item| PricedLine {
            menu_item_id: item.menu_item_id,
            unit_price: item.unit_price,
            quantity: item.quantity,
        })
        .collect()
}

/// Platform service fee: `subtotal × rate + flat`, charged on top of the order
/// total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceFeePolicy {
    pub rate: Decimal,
    pub flat: Decimal,
}

pub fn service_fee(subtotal: Decimal, policy: &ServiceFeePolicy) -> Decimal {
    if subtotal <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    round_money(subtotal * policy.rate + policy.flat)
}

/// Flat tax rate and delivery fee taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfiguredPricingPolicy {
    pub tax_rate: Decimal,
    pub delivery_fee: Decimal,
}

impl ConfiguredPricingPolicy {
    pub fn new(tax_rate: Decimal, delivery_fee: Decimal) -> Self {
        Self {
            tax_rate,
            delivery_fee,
        }
    }
}

impl PricingPolicy for ConfiguredPricingPolicy {
    fn quote(
        &self,
        _restaurant_id: Option<Uuid>,
        subtotal: Decimal,
        lines: &[PricedLine],
    ) -> PriceQuote {
        if lines.is_empty() {
            return PriceQuote::default();
        }
        PriceQuote {
            tax: subtotal * self.tax_rate,
            delivery_fee: self.delivery_fee,
        }
    }
}

/// Money calculator shared by the cart store and the payment orchestrator.
#[derive(Clone)]
pub struct PricingService {
    policy: Arc<dyn PricingPolicy>,
    service_fee: ServiceFeePolicy,
}

impl PricingService {
    pub fn new(policy: Arc<dyn PricingPolicy>, service_fee: ServiceFeePolicy) -> Self {
        Self {
            policy,
            service_fee,
        }
    }

    pub fn cart_totals(&self, restaurant_id: Option<Uuid>, items: &[cart_item::Model]) -> CartTotals {
        calculate_cart_totals(restaurant_id, &priced_lines(items), self.policy.as_ref())
    }

    pub fn service_fee(&self, subtotal: Decimal) -> Decimal {
        service_fee(subtotal, &self.service_fee)
    }
}
