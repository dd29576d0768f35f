//! Builders shared by the sync unit tests.

use crate::models::{
    Annotations, Cadence, ExistingLine, FlatPrice, InvoiceStatus, InvoicedLine, ItemVersion,
    Line, LinePrice, ManagedBy, PaymentTerm, Period, PhaseView, Price, ProrationConfig, RateCard,
    SplitLineGroup, SplitLineHierarchy, SubscriptionReference, SubscriptionView, UsagePrice,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

pub fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn flat(amount: Decimal, payment_term: PaymentTerm) -> RateCard {
    RateCard {
        name: "Platform fee".to_string(),
        feature_key: None,
        price: Some(Price::Flat(FlatPrice {
            amount,
            payment_term,
        })),
        billing_cadence: Some(Cadence::months(1)),
    }
}

pub fn one_time(amount: Decimal) -> RateCard {
    RateCard {
        name: "Setup fee".to_string(),
        feature_key: None,
        price: Some(Price::Flat(FlatPrice {
            amount,
            payment_term: PaymentTerm::InAdvance,
        })),
        billing_cadence: None,
    }
}

pub fn usage(unit_amount: Decimal) -> RateCard {
    RateCard {
        name: "API calls".to_string(),
        feature_key: Some("api_calls".to_string()),
        price: Some(Price::Usage(UsagePrice { unit_amount })),
        billing_cadence: Some(Cadence::months(1)),
    }
}

pub fn version(
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
    rate_card: RateCard,
) -> ItemVersion {
    ItemVersion {
        id: Uuid::new_v4(),
        active_from: from,
        active_to: to,
        rate_card,
    }
}

pub fn phase(
    key: &str,
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
    items: Vec<(&str, Vec<ItemVersion>)>,
) -> PhaseView {
    PhaseView {
        id: Uuid::new_v4(),
        key: key.to_string(),
        name: key.to_string(),
        active_from: from,
        active_to: to,
        items: items
            .into_iter()
            .map(|(key, versions)| (key.to_string(), versions))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub fn subscription(start: DateTime<Utc>, phases: Vec<PhaseView>) -> SubscriptionView {
    subscription_anchored(start, start, phases)
}

pub fn subscription_anchored(
    start: DateTime<Utc>,
    anchor: DateTime<Utc>,
    phases: Vec<PhaseView>,
) -> SubscriptionView {
    SubscriptionView {
        id: Uuid::new_v4(),
        namespace: "default".to_string(),
        customer_id: Uuid::new_v4(),
        name: "Pro plan".to_string(),
        currency: "USD".to_string(),
        billing_anchor: Some(anchor),
        billing_cadence: Cadence::months(1),
        proration: ProrationConfig { enabled: true },
        active_from: start,
        active_to: None,
        phases,
    }
}

pub fn flat_line_price(amount: Decimal, payment_term: PaymentTerm) -> LinePrice {
    LinePrice::Flat {
        per_unit_amount: amount,
        payment_term,
    }
}

/// A subscription-managed line on an invoice in `status`.
pub fn existing_line(
    unique_id: &str,
    period: Period,
    price: LinePrice,
    status: InvoiceStatus,
) -> InvoicedLine {
    InvoicedLine {
        line: Line {
            id: Uuid::new_v4(),
            invoice_id: Uuid::new_v4(),
            namespace: "default".to_string(),
            customer_id: Uuid::new_v4(),
            name: "Platform fee".to_string(),
            currency: "USD".to_string(),
            feature_key: None,
            period,
            invoice_at: period.from,
            price,
            managed_by: ManagedBy::Subscription,
            annotations: Annotations::new(),
            child_unique_reference_id: Some(unique_id.to_string()),
            subscription: Some(SubscriptionReference {
                subscription_id: Uuid::new_v4(),
                phase_id: Uuid::new_v4(),
                item_id: Uuid::new_v4(),
            }),
            split_line_group_id: None,
            deleted_at: None,
        },
        invoice_status: status,
    }
}

/// A split-line hierarchy whose children cover `periods` in order.
pub fn hierarchy(
    unique_id: &str,
    price: LinePrice,
    children: Vec<(Period, InvoiceStatus)>,
) -> ExistingLine {
    let group_id = Uuid::new_v4();
    let service_period = Period::new(
        children.first().map(|(period, _)| period.from).unwrap(),
        children.last().map(|(period, _)| period.to).unwrap(),
    );

    let lines = children
        .into_iter()
        .map(|(period, status)| {
            let mut child = existing_line(unique_id, period, price.clone(), status);
            child.line.child_unique_reference_id = None;
            child.line.split_line_group_id = Some(group_id);
            child.line.invoice_at = period.to;
            child
        })
        .collect();

    ExistingLine::Hierarchy(SplitLineHierarchy {
        group: SplitLineGroup {
            id: group_id,
            namespace: "default".to_string(),
            name: "API calls".to_string(),
            currency: "USD".to_string(),
            service_period,
            price,
            unique_reference_id: Some(unique_id.to_string()),
            subscription: None,
            annotations: Annotations::new(),
            deleted_at: None,
        },
        lines,
    })
}
