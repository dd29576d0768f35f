//! Price derivation for generated items.

use crate::models::{LinePrice, PaymentTerm, Period, Price, SubscriptionView};
use crate::sync::phase_iterator::GeneratedItem;
use rust_decimal::{Decimal, RoundingStrategy};

/// Minor-unit digits of a currency.
pub fn currency_precision(currency: &str) -> u32 {
    match currency {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
        _ => 2,
    }
}

/// Whether a flat fee is scaled down to the part of its cycle actually served.
///
/// A period cut short only because the subscription ends is billed in full.
pub fn should_prorate(subscription: &SubscriptionView, item: &GeneratedItem) -> bool {
    if !subscription.proration.enabled {
        return false;
    }
    if !matches!(item.rate_card.price, Some(Price::Flat(_))) {
        return false;
    }

    let service = item.service_period;
    let full = item.full_service_period;
    if service == full || service.is_empty() || full.is_empty() {
        return false;
    }

    let ends_with_subscription =
        service.from == full.from && subscription.active_to == Some(service.to);
    !ends_with_subscription
}

/// `amount * service / full`, unrounded.
pub fn prorated_amount(amount: Decimal, service: &Period, full: &Period) -> Decimal {
    let full_secs = full.duration().num_seconds();
    if full_secs <= 0 {
        return amount;
    }
    amount * Decimal::from(service.duration().num_seconds()) / Decimal::from(full_secs)
}

/// The price a line for `item` should carry.
///
/// Returns `None` when no line should exist: zero amounts, and recurring
/// in-arrears items whose cycle has no extent yet.
pub fn line_price(subscription: &SubscriptionView, item: &GeneratedItem) -> Option<LinePrice> {
    match item.rate_card.price.as_ref()? {
        Price::Usage(usage) => Some(LinePrice::Usage(usage.clone())),
        Price::Flat(flat) => {
            if item.is_recurring()
                && flat.payment_term == PaymentTerm::InArrears
                && item.full_service_period.is_empty()
            {
                return None;
            }

            let amount = if should_prorate(subscription, item) {
                prorated_amount(flat.amount, &item.service_period, &item.full_service_period)
            } else {
                flat.amount
            };
            let amount = amount.round_dp_with_strategy(
                currency_precision(&subscription.currency),
                RoundingStrategy::MidpointAwayFromZero,
            );

            if amount.is_zero() {
                return None;
            }

            Some(LinePrice::Flat {
                per_unit_amount: amount,
                payment_term: flat.payment_term,
            })
        }
    }
}
