//! Ordered quantity events of a buffer or resource.
//!
//! For a buffer the running total is the on-hand inventory; for a resource it
//! is the capacity in use. Events at the same date are ordered by their
//! `order` field and then by owner, so the running total at any position is
//! deterministic.

use std::collections::BTreeMap;

use crate::id::OperationPlanId;
use crate::time::Date;

/// Event ordering on buffers: receipts before issues at the same instant.
pub const ORDER_PRODUCE: u8 = 0;
pub const ORDER_CONSUME: u8 = 1;
/// Event ordering on resources: releases before claims at the same instant.
pub const ORDER_RELEASE: u8 = 0;
pub const ORDER_CLAIM: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventOwner {
    /// Initial inventory of a buffer.
    Initial,
    /// Flowplan or loadplan `n` of an operationplan.
    Plan(OperationPlanId, u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub date: Date,
    pub order: u8,
    pub owner: EventOwner,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: BTreeMap<EventKey, f64>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: EventKey, qty: f64) {
        *self.events.entry(key).or_insert(0.0) += qty;
    }

    pub fn remove(&mut self, key: &EventKey) -> Option<f64> {
        self.events.remove(key)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = (&EventKey, f64)> {
        self.events.iter().map(|(k, q)| (k, *q))
    }

    /// Running total including every event dated at or before `date`.
    pub fn onhand_at(&self, date: Date) -> f64 {
        self.events
            .iter()
            .take_while(|(k, _)| k.date <= date)
            .map(|(_, q)| *q)
            .sum()
    }

    /// Running total at `date` ignoring events whose owner is rejected by
    /// `keep`.
    pub fn onhand_filtered<F>(&self, date: Date, keep: F) -> f64
    where
        F: Fn(&EventOwner) -> bool,
    {
        self.events
            .iter()
            .take_while(|(k, _)| k.date <= date)
            .filter(|(k, _)| keep(&k.owner))
            .map(|(_, q)| *q)
            .sum()
    }

    /// Running total just before `date`.
    pub fn onhand_before(&self, date: Date) -> f64 {
        self.events
            .iter()
            .take_while(|(k, _)| k.date < date)
            .map(|(_, q)| *q)
            .sum()
    }

    /// Running total at `from`, followed by the running total after each
    /// later date carrying events.
    pub fn profile_from(&self, from: Date) -> Vec<(Date, f64)> {
        let mut iter = self.events.iter().peekable();
        let mut total = 0.0;
        while let Some((_, q)) = iter.next_if(|(k, _)| k.date <= from) {
            total += *q;
        }
        let mut out = vec![(from, total)];
        while let Some((k, q)) = iter.next() {
            total += *q;
            if iter.peek().is_none_or(|(next, _)| next.date != k.date) {
                out.push((k.date, total));
            }
        }
        out
    }

    /// Sum of events in `[from, to)`.
    pub fn flow_between(&self, from: Date, to: Date) -> f64 {
        self.events
            .iter()
            .skip_while(|(k, _)| k.date < from)
            .take_while(|(k, _)| k.date < to)
            .map(|(_, q)| *q)
            .sum()
    }

    /// Distinct event dates, ascending.
    pub fn dates(&self) -> Vec<Date> {
        let mut out: Vec<Date> = self.events.keys().map(|k| k.date).collect();
        out.dedup();
        out
    }

    /// Distinct event dates in `[from, to)`.
    pub fn dates_between(&self, from: Date, to: Date) -> Vec<Date> {
        let mut out: Vec<Date> = self
            .events
            .keys()
            .map(|k| k.date)
            .skip_while(|d| *d < from)
            .take_while(|d| *d < to)
            .collect();
        out.dedup();
        out
    }

    /// Events in `[from, to)`.
    pub fn events_between(&self, from: Date, to: Date) -> impl Iterator<Item = (&EventKey, f64)> {
        self.events
            .iter()
            .skip_while(move |(k, _)| k.date < from)
            .take_while(move |(k, _)| k.date < to)
            .map(|(k, q)| (k, *q))
    }

    /// Operationplans with an event on this timeline, without duplicates.
    pub fn owners(&self) -> Vec<OperationPlanId> {
        let mut out = Vec::new();
        for k in self.events.keys() {
            if let EventOwner::Plan(id, _) = k.owner
                && !out.contains(&id)
            {
                out.push(id);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(day: i64, order: u8, n: u16) -> EventKey {
        let mut map = slotmap::SlotMap::<OperationPlanId, ()>::with_key();
        let id = map.insert(());
        EventKey {
            date: Date::from_days(day),
            order,
            owner: EventOwner::Plan(id, n),
        }
    }

    #[test]
    fn onhand_accumulates_by_date() {
        let mut t = Timeline::new();
        t.insert(
            EventKey {
                date: Date::INFINITE_PAST,
                order: ORDER_PRODUCE,
                owner: EventOwner::Initial,
            },
            10.0,
        );
        t.insert(key(5, ORDER_CONSUME, 0), -4.0);
        t.insert(key(7, ORDER_PRODUCE, 1), 3.0);
        assert_eq!(t.onhand_at(Date::from_days(0)), 10.0);
        assert_eq!(t.onhand_at(Date::from_days(5)), 6.0);
        assert_eq!(t.onhand_before(Date::from_days(5)), 10.0);
        assert_eq!(t.onhand_at(Date::from_days(9)), 9.0);
        assert_eq!(t.flow_between(Date::from_days(5), Date::from_days(7)), -4.0);
        assert_eq!(t.dates().len(), 3);
    }

    #[test]
    fn profile_collapses_same_date_events() {
        let mut t = Timeline::new();
        t.insert(key(1, ORDER_PRODUCE, 0), 5.0);
        t.insert(key(3, ORDER_PRODUCE, 1), 2.0);
        t.insert(key(3, ORDER_CONSUME, 2), -4.0);
        t.insert(key(6, ORDER_CONSUME, 3), -1.0);
        let p = t.profile_from(Date::from_days(2));
        assert_eq!(
            p,
            vec![
                (Date::from_days(2), 5.0),
                (Date::from_days(3), 3.0),
                (Date::from_days(6), 2.0),
            ]
        );
    }

    #[test]
    fn same_date_orders_receipts_first() {
        let a = key(3, ORDER_PRODUCE, 0);
        let b = key(3, ORDER_CONSUME, 0);
        assert!(a < b);
    }

    #[test]
    fn filtered_sum_skips_owner() {
        let mut t = Timeline::new();
        let k = key(1, ORDER_CLAIM, 0);
        t.insert(k, 2.0);
        t.insert(key(1, ORDER_CLAIM, 1), 1.0);
        let total = t.onhand_filtered(Date::from_days(2), |o| *o != k.owner);
        assert_eq!(total, 1.0);
        assert_eq!(t.remove(&k), Some(2.0));
        assert_eq!(t.len(), 1);
    }
}
