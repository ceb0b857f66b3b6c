//! Rate limiter (§4.E).
//!
//! Configuration is a list of [`Rule`]s, each scoped by [`TrackBy`]. Every
//! inbound message is checked against every rule; the first rule whose
//! counter exceeds `max_messages` within its window yields `Err`, and the
//! caller disconnects the originating client session.
//!
//! Grounded on `cloudillo-core`'s `rate_limit::limiter::RateLimitManager`:
//! one `governor` keyed rate limiter per rule, backed by
//! `governor::state::keyed::DashMapStateStore` so concurrent scopes don't
//! contend on a single lock. Unlike the donor's IP-hierarchy scope keys,
//! scopes here are `user` / `document` / `user+document` strings per
//! [`TrackBy`].

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter as GovernorRateLimiter};

use crate::error::{Error, TlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackBy {
	User,
	Document,
	UserDocument,
}

#[derive(Debug, Clone)]
pub struct Rule {
	pub id: String,
	pub max_messages: u32,
	pub window_ms: u64,
	pub track_by: TrackBy,
}

type KeyedLimiter = GovernorRateLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// A multi-rule rate limiter over an in-process `governor`-backed counter
/// per rule. `max_message_size` is checked first and independently of the
/// per-message-count rules, per §4.E.
pub struct RateLimitManager {
	rules: Vec<Rule>,
	limiters: DashMap<String, KeyedLimiter>,
	max_message_size: usize,
	exceeded_total: AtomicU64,
}

impl RateLimitManager {
	pub fn new(rules: Vec<Rule>, max_message_size: usize) -> Self {
		RateLimitManager { rules, limiters: DashMap::new(), max_message_size, exceeded_total: AtomicU64::new(0) }
	}

	pub fn max_message_size(&self) -> usize {
		self.max_message_size
	}

	/// Total number of rate-limit rejections observed so far, for the
	/// `rate_limit_exceeded_total` metric.
	pub fn exceeded_total(&self) -> u64 {
		self.exceeded_total.load(Ordering::Relaxed)
	}

	/// Checks a single inbound message of `message_len` bytes for user
	/// `user_id` on document `document_id` against every configured rule
	/// plus the size limit. Returns `Err` on the first violation.
	pub fn check(&self, user_id: &str, document_id: &str, message_len: usize) -> TlResult<()> {
		if message_len > self.max_message_size {
			return Err(Error::SizeExceeded);
		}

		for rule in &self.rules {
			let scope_key = scope_key(rule.track_by, user_id, document_id);
			let limiter = self.limiter_for(rule);
			if limiter.check_key(&scope_key).is_err() {
				self.exceeded_total.fetch_add(1, Ordering::Relaxed);
				return Err(Error::RateLimited { rule: rule.id.clone(), scope: scope_key });
			}
		}
		Ok(())
	}

	fn limiter_for(&self, rule: &Rule) -> dashmap::mapref::one::RefMut<'_, String, KeyedLimiter> {
		self.limiters.entry(rule.id.clone()).or_insert_with(|| GovernorRateLimiter::keyed(quota_for(rule)))
	}
}

fn scope_key(track_by: TrackBy, user_id: &str, document_id: &str) -> String {
	match track_by {
		TrackBy::User => format!("user:{user_id}"),
		TrackBy::Document => format!("document:{document_id}"),
		TrackBy::UserDocument => format!("user-document:{user_id}:{document_id}"),
	}
}

fn quota_for(rule: &Rule) -> Quota {
	let max = rule.max_messages.max(1);
	let replenish_nanos = u128::from(rule.window_ms.max(1)) * 1_000_000 / u128::from(max);
	let period = Duration::from_nanos(u64::try_from(replenish_nanos.max(1)).unwrap_or(u64::MAX));
	let burst = NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN);
	match Quota::with_period(period) {
		Some(quota) => quota.allow_burst(burst),
		None => Quota::per_second(burst),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rule(max: u32, window_ms: u64, track_by: TrackBy) -> Rule {
		Rule { id: "r1".to_string(), max_messages: max, window_ms, track_by }
	}

	#[test]
	fn allows_up_to_max_then_rejects() {
		let mgr = RateLimitManager::new(vec![rule(3, 1000, TrackBy::User)], 1 << 20);
		for _ in 0..3 {
			assert!(mgr.check("u1", "doc-1", 10).is_ok());
		}
		let err = mgr.check("u1", "doc-1", 10).unwrap_err();
		match err {
			Error::RateLimited { rule: r, .. } => assert_eq!(r, "r1"),
			other => panic!("expected RateLimited, got {other:?}"),
		}
		assert_eq!(mgr.exceeded_total(), 1);
	}

	#[test]
	fn scopes_are_independent() {
		let mgr = RateLimitManager::new(vec![rule(1, 1000, TrackBy::User)], 1 << 20);
		assert!(mgr.check("u1", "doc-1", 10).is_ok());
		// A different user is a different scope and is unaffected.
		assert!(mgr.check("u2", "doc-1", 10).is_ok());
		assert!(mgr.check("u1", "doc-1", 10).is_err());
	}

	#[test]
	fn document_scoped_rule_tracks_by_document_not_user() {
		let mgr = RateLimitManager::new(vec![rule(1, 1000, TrackBy::Document)], 1 << 20);
		assert!(mgr.check("u1", "doc-1", 10).is_ok());
		assert!(mgr.check("u2", "doc-1", 10).is_err());
		assert!(mgr.check("u2", "doc-2", 10).is_ok());
	}

	#[test]
	fn rejects_oversized_message_before_counting() {
		let mgr = RateLimitManager::new(vec![rule(5, 1000, TrackBy::User)], 16);
		let err = mgr.check("u1", "doc-1", 17).unwrap_err();
		assert_eq!(err.kind(), crate::error::ErrorKind::SizeExceeded);
		// Size rejection must not consume a rule slot.
		assert_eq!(mgr.exceeded_total(), 0);
	}
}

// vim: ts=4
