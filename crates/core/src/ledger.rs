//! Incremental ledger arithmetic for client purchases.
//!
//! A client's debt and container holdings are never re-aggregated from the
//! full purchase history. Every create, edit or delete applies the exact
//! delta it causes, so the functions here take the current aggregate and
//! return the next one.

use std::collections::HashMap;

use thiserror::Error;

use crate::types::{
    ClientBalance, ContainerKind, LineItems, ProductKind, PurchaseEntry, Returns,
};

const CONTAINERS: [ContainerKind; 2] = [ContainerKind::Siphon, ContainerKind::Jug];

/// Unit prices keyed by product. Products absent from the table price at zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceTable {
    prices: HashMap<ProductKind, i64>,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(catalog name, price)` rows, skipping names the ledger does not know.
    pub fn from_catalog<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, i64)>,
    {
        let prices = rows
            .into_iter()
            .filter_map(|(name, price)| ProductKind::from_catalog_name(name).map(|kind| (kind, price)))
            .collect();
        Self { prices }
    }

    pub fn with_price(mut self, kind: ProductKind, price: i64) -> Self {
        self.prices.insert(kind, price);
        self
    }

    /// Unit price of `kind`, or zero when the catalog has no entry for it.
    pub fn price(&self, kind: ProductKind) -> i64 {
        self.prices.get(&kind).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Validated purchase values ready to be applied to a ledger.
///
/// Construction rejects negative quantities and payments, so the engine never
/// sees unchecked input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseDraft {
    items: LineItems,
    payment: i64,
    returns: Returns,
}

impl PurchaseDraft {
    pub fn new(items: LineItems, payment: i64, returns: Returns) -> Result<Self, LedgerError> {
        let fields = [
            ("siphons", items.siphons),
            ("jugs_6l", items.jugs_6l),
            ("jugs_12l", items.jugs_12l),
            ("payment", payment),
            ("returned_siphons", returns.siphons),
            ("returned_jugs", returns.jugs),
        ];
        if let Some((field, value)) = fields.into_iter().find(|(_, value)| *value < 0) {
            return Err(LedgerError::Negative { field, value });
        }

        Ok(Self {
            items,
            payment,
            returns,
        })
    }

    pub fn items(&self) -> LineItems {
        self.items
    }

    pub fn payment(&self) -> i64 {
        self.payment
    }

    pub fn returns(&self) -> Returns {
        self.returns
    }
}

/// Result of applying a purchase to a client's ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerOutcome {
    pub entry: PurchaseEntry,
    pub balance: ClientBalance,
}

/// Errors raised while computing ledger deltas.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: i64 },
    #[error("amounts are too large to be recorded")]
    Overflow,
}

/// Prices the line items: `Σ qty_i * price_i`.
pub fn price_items(items: &LineItems, prices: &PriceTable) -> Result<i64, LedgerError> {
    ProductKind::ALL.into_iter().try_fold(0i64, |total, kind| {
        let line = mul(items.quantity(kind), prices.price(kind))?;
        add(total, line)
    })
}

/// Applies a new purchase to the client's current balance.
pub fn open_purchase(
    balance: &ClientBalance,
    draft: &PurchaseDraft,
    prices: &PriceTable,
) -> Result<LedgerOutcome, LedgerError> {
    let total = price_items(&draft.items, prices)?;
    let debt = sub(add(balance.debt, total)?, draft.payment)?;

    let mut next = ClientBalance { debt, ..*balance };
    for container in CONTAINERS {
        let held = sub(
            add(balance.held(container), draft.items.delivered(container))?,
            draft.returns.returned(container),
        )?;
        next.set_held(container, held);
    }

    Ok(LedgerOutcome {
        entry: PurchaseEntry {
            items: draft.items,
            returns: draft.returns,
            paid: draft.payment,
            total,
            debt_after: debt,
        },
        balance: next,
    })
}

/// Re-derives the client's balance after a historical purchase is edited.
///
/// The original purchase's recorded total is removed and the edited values are
/// priced with the current table:
/// `debt - total_original + total_new - (payment_new - payment_original)`.
/// Container holdings reverse the original deliveries and returns the same way.
pub fn recalculate(
    original: &PurchaseEntry,
    draft: &PurchaseDraft,
    balance: &ClientBalance,
    prices: &PriceTable,
) -> Result<LedgerOutcome, LedgerError> {
    let total_original = original.total;
    let total_new = price_items(&draft.items, prices)?;
    let payment_delta = sub(draft.payment, original.paid)?;

    let debt = sub(
        add(sub(balance.debt, total_original)?, total_new)?,
        payment_delta,
    )?;

    let mut next = ClientBalance { debt, ..*balance };
    for container in CONTAINERS {
        let held = balance.held(container);
        let held = sub(held, original.items.delivered(container))?;
        let held = add(held, draft.items.delivered(container))?;
        let held = sub(held, draft.returns.returned(container))?;
        let held = add(held, original.returns.returned(container))?;
        next.set_held(container, held);
    }

    Ok(LedgerOutcome {
        entry: PurchaseEntry {
            items: draft.items,
            returns: draft.returns,
            paid: draft.payment,
            total: total_new,
            debt_after: debt,
        },
        balance: next,
    })
}

/// Removes a stored purchase's effect from the client's balance using its recorded total.
pub fn reverse_purchase(
    original: &PurchaseEntry,
    balance: &ClientBalance,
) -> Result<ClientBalance, LedgerError> {
    let debt = add(sub(balance.debt, original.total)?, original.paid)?;

    let mut next = ClientBalance { debt, ..*balance };
    for container in CONTAINERS {
        let held = add(
            sub(balance.held(container), original.items.delivered(container))?,
            original.returns.returned(container),
        )?;
        next.set_held(container, held);
    }
    Ok(next)
}

fn add(a: i64, b: i64) -> Result<i64, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow)
}

fn sub(a: i64, b: i64) -> Result<i64, LedgerError> {
    a.checked_sub(b).ok_or(LedgerError::Overflow)
}

fn mul(a: i64, b: i64) -> Result<i64, LedgerError> {
    a.checked_mul(b).ok_or(LedgerError::Overflow)
}
