use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

/// Inclusive range of calendar days (UTC) covered by a billing report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    from: NaiveDate,
    to: NaiveDate,
}

impl DateRange {
    /// Parses `YYYY-MM-DD` bounds, requiring both and `from <= to`.
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Result<Self, RangeError> {
        let (Some(from), Some(to)) = (from, to) else {
            return Err(RangeError::Missing);
        };
        let from = parse_day(from)?;
        let to = parse_day(to)?;
        if from > to {
            return Err(RangeError::Inverted);
        }
        Ok(Self { from, to })
    }

    /// First instant of the range, `from` at 00:00:00.000Z.
    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.from.and_time(NaiveTime::MIN))
    }

    /// Last instant of the range, `to` at 23:59:59.999Z.
    pub fn end(&self) -> DateTime<Utc> {
        let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
        Utc.from_utc_datetime(&self.to.and_time(last))
    }
}

fn parse_day(value: &str) -> Result<NaiveDate, RangeError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| RangeError::InvalidFormat(value.to_string()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("both from and to dates are required")]
    Missing,
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidFormat(String),
    #[error("from must not be after to")]
    Inverted,
}

/// A purchase joined with its client, as read for billing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BilledPurchase {
    pub client_id: i64,
    pub client_name: String,
    pub client_debt: i64,
    pub siphons: i64,
    pub jugs_6l: i64,
    pub jugs_12l: i64,
    pub paid: i64,
    pub total: i64,
}

/// Per-client totals over a billing range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingSummary {
    pub client_id: i64,
    pub name: String,
    pub siphons: i64,
    pub jugs_6l: i64,
    pub jugs_12l: i64,
    pub total_paid: i64,
    pub total_purchased: i64,
    /// Client debt at the time the report is built, not within the range.
    pub current_debt: i64,
}

/// Groups purchases by client, ordered by client id.
pub fn summarize<I>(purchases: I) -> Vec<BillingSummary>
where
    I: IntoIterator<Item = BilledPurchase>,
{
    let mut grouped: BTreeMap<i64, BillingSummary> = BTreeMap::new();
    for purchase in purchases {
        let summary = grouped
            .entry(purchase.client_id)
            .or_insert_with(|| BillingSummary {
                client_id: purchase.client_id,
                name: purchase.client_name.clone(),
                siphons: 0,
                jugs_6l: 0,
                jugs_12l: 0,
                total_paid: 0,
                total_purchased: 0,
                current_debt: purchase.client_debt,
            });
        summary.siphons = summary.siphons.saturating_add(purchase.siphons);
        summary.jugs_6l = summary.jugs_6l.saturating_add(purchase.jugs_6l);
        summary.jugs_12l = summary.jugs_12l.saturating_add(purchase.jugs_12l);
        summary.total_paid = summary.total_paid.saturating_add(purchase.paid);
        summary.total_purchased = summary.total_purchased.saturating_add(purchase.total);
    }
    grouped.into_values().collect()
}
