// Copyright 2024-2026 the noema developers.
// This file is part of noema.

// noema is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// noema is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with noema.  If not, see <http://www.gnu.org/licenses/>.

//! Core record types: items, roles, statuses, confidence and importance.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::term::Term;

pub fn now_millis() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

/// Unique id of a knowledge-base item. Sequential; the high-water mark is
/// part of the persisted snapshot so ids are never reused after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

impl FromStr for ItemId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.trim_start_matches('#').parse().map(ItemId)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
	Note,
	Goal,
	Strategy,
	Outcome,
	Meta,
}

impl Role {
	pub fn as_str(&self) -> &'static str {
		match self {
			Role::Note => "NOTE",
			Role::Goal => "GOAL",
			Role::Strategy => "STRATEGY",
			Role::Outcome => "OUTCOME",
			Role::Meta => "META",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Role {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"NOTE" => Ok(Role::Note),
			"GOAL" => Ok(Role::Goal),
			"STRATEGY" => Ok(Role::Strategy),
			"OUTCOME" => Ok(Role::Outcome),
			"META" => Ok(Role::Meta),
			other => Err(format!("unknown role `{}`", other)),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
	Pending,
	Active,
	WaitingChildren,
	Done,
	Failed,
}

impl Status {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Status::Done | Status::Failed)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Status::Pending => "PENDING",
			Status::Active => "ACTIVE",
			Status::WaitingChildren => "WAITING_CHILDREN",
			Status::Done => "DONE",
			Status::Failed => "FAILED",
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Status {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"PENDING" => Ok(Status::Pending),
			"ACTIVE" => Ok(Status::Active),
			"WAITING_CHILDREN" => Ok(Status::WaitingChildren),
			"DONE" => Ok(Status::Done),
			"FAILED" => Ok(Status::Failed),
			other => Err(format!("unknown status `{}`", other)),
		}
	}
}

/// Positive/negative evidence counts with Laplace smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confidence {
	pos: u32,
	neg: u32,
}

impl Default for Confidence {
	fn default() -> Self {
		Self { pos: 0, neg: 0 }
	}
}

impl Confidence {
	pub const fn new(pos: u32, neg: u32) -> Self {
		Self { pos, neg }
	}

	/// Approximate a target score with a fixed evidence mass of eight
	/// observations. Lossy by construction; scores only prioritize.
	pub fn from_score(score: f64) -> Self {
		let score = score.clamp(0.0, 1.0);
		let pos = (score * 8.0).round() as u32;
		Self { pos, neg: 8 - pos }
	}

	/// `(pos + 1) / (pos + neg + 2)`; 0.5 with no evidence.
	pub fn score(&self) -> f64 {
		(f64::from(self.pos) + 1.0) / (f64::from(self.pos) + f64::from(self.neg) + 2.0)
	}

	/// Record one observation. Pure; counters saturate at `u32::MAX`.
	pub fn update(&self, positive: bool) -> Confidence {
		if positive {
			Confidence { pos: self.pos.saturating_add(1), neg: self.neg }
		} else {
			Confidence { pos: self.pos, neg: self.neg.saturating_add(1) }
		}
	}

	pub fn evidence(&self) -> (u32, u32) {
		(self.pos, self.neg)
	}
}

/// Two-tier attention value. The short-term component decays fast and
/// feeds a fraction of what it loses into the long-term component, so items
/// that were hot for a while stay reachable after the spike fades.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Importance {
	sti: f64,
	lti: f64,
}

impl Default for Importance {
	fn default() -> Self {
		Self { sti: 0.5, lti: 0.1 }
	}
}

impl Importance {
	pub fn new(sti: f64, lti: f64) -> Self {
		Self { sti: sti.clamp(0.0, 1.0), lti: lti.clamp(0.0, 1.0) }
	}

	/// Blended sampling/eviction weight.
	pub fn weight(&self) -> f64 {
		0.7 * self.sti + 0.3 * self.lti
	}

	pub fn sti(&self) -> f64 {
		self.sti
	}

	pub fn lti(&self) -> f64 {
		self.lti
	}

	/// One decay step. `lti_learn` is the fraction of the decayed STI that
	/// the long-term tier absorbs.
	pub fn decayed(&self, sti_decay: f64, lti_decay: f64, lti_learn: f64) -> Importance {
		let lost = self.sti * sti_decay;
		Importance {
			sti: (self.sti - lost).max(0.0),
			lti: (self.lti * (1.0 - lti_decay) + lost * lti_learn).clamp(0.0, 1.0),
		}
	}

	pub fn boosted(&self, amount: f64) -> Importance {
		Importance { sti: (self.sti + amount).clamp(0.0, 1.0), lti: self.lti }
	}
}

/// Restricted metadata values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
	Str(String),
	Num(f64),
	Bool(bool),
	StrList(Vec<String>),
}

impl MetaValue {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			MetaValue::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_num(&self) -> Option<f64> {
		match self {
			MetaValue::Num(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_list(&self) -> Option<&[String]> {
		match self {
			MetaValue::StrList(l) => Some(l),
			_ => None,
		}
	}
}

pub type Metadata = BTreeMap<String, MetaValue>;

/// Shutdown message understood by every worker actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Die;

impl xtra::Message for Die {
	type Result = ();
}

/// Reserved metadata keys.
pub mod meta_keys {
	pub const PARENT_ID: &str = "parent_id";
	pub const PROVENANCE: &str = "provenance";
	pub const RETRY_COUNT: &str = "retry_count";
	pub const ERROR_INFO: &str = "error_info";
	pub const TARGET_ROLE: &str = "target_role";
}

/// The unit of knowledge. Items are immutable snapshots: every revision
/// clones, edits and swaps through the knowledge base's compare-and-set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
	pub id: ItemId,
	pub role: Role,
	pub content: Term,
	pub belief: Confidence,
	pub status: Status,
	pub importance: Importance,
	pub metadata: Metadata,
	pub created_at: i64,
	pub updated_at: i64,
}

impl Item {
	/// A fresh PENDING item. The id is a placeholder until the knowledge
	/// base commits it.
	pub fn new(role: Role, content: Term, belief: Confidence) -> Self {
		let now = now_millis();
		Self {
			id: ItemId(0),
			role,
			content,
			belief,
			status: Status::Pending,
			importance: Importance::default(),
			metadata: Metadata::new(),
			created_at: now,
			updated_at: now,
		}
	}

	pub fn with_parent(mut self, parent: ItemId) -> Self {
		self.metadata.insert(meta_keys::PARENT_ID.into(), MetaValue::Str(parent.to_string()));
		self
	}

	pub fn with_status(mut self, status: Status) -> Self {
		self.status = status;
		self
	}

	pub fn with_provenance(mut self, sources: Vec<String>) -> Self {
		self.metadata.insert(meta_keys::PROVENANCE.into(), MetaValue::StrList(sources));
		self
	}

	pub fn with_meta<S: Into<String>>(mut self, key: S, value: MetaValue) -> Self {
		self.metadata.insert(key.into(), value);
		self
	}

	pub fn parent_id(&self) -> Option<ItemId> {
		self.metadata.get(meta_keys::PARENT_ID)?.as_str()?.parse().ok()
	}

	pub fn provenance(&self) -> &[String] {
		self.metadata.get(meta_keys::PROVENANCE).and_then(MetaValue::as_list).unwrap_or(&[])
	}

	pub fn retry_count(&self) -> u32 {
		self.metadata.get(meta_keys::RETRY_COUNT).and_then(MetaValue::as_num).unwrap_or(0.0) as u32
	}

	pub fn error_info(&self) -> Option<&str> {
		self.metadata.get(meta_keys::ERROR_INFO).and_then(MetaValue::as_str)
	}

	pub fn target_role(&self) -> Option<Role> {
		self.metadata.get(meta_keys::TARGET_ROLE)?.as_str()?.parse().ok()
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// Does the provenance chain mention `id`?
	pub fn supported_by(&self, id: ItemId) -> bool {
		let key = id.to_string();
		self.provenance().iter().any(|p| *p == key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn confidence_laplace_smoothing() {
		let c = Confidence::default();
		assert!((c.score() - 0.5).abs() < f64::EPSILON);

		let c = c.update(true);
		assert!((c.score() - 2.0 / 3.0).abs() < 1e-9);

		let c = Confidence::new(u32::MAX, 0).update(true);
		assert_eq!(c.evidence().0, u32::MAX);
	}

	#[test]
	fn importance_decay_feeds_lti() {
		let imp = Importance::new(1.0, 0.0);
		let decayed = imp.decayed(0.1, 0.01, 0.5);
		assert!(decayed.sti() < imp.sti());
		assert!(decayed.lti() > imp.lti());
		assert!(decayed.weight() < imp.weight());
	}

	#[test]
	fn item_metadata_accessors() {
		let item = Item::new(Role::Goal, Term::symbol("g"), Confidence::default())
			.with_parent(ItemId(7))
			.with_provenance(vec!["#3".into(), "ORACLE".into()])
			.with_meta(meta_keys::RETRY_COUNT, MetaValue::Num(2.0));

		assert_eq!(item.parent_id(), Some(ItemId(7)));
		assert!(item.supported_by(ItemId(3)));
		assert!(!item.supported_by(ItemId(4)));
		assert_eq!(item.retry_count(), 2);
	}

	#[test]
	fn status_parsing() {
		assert_eq!("WAITING_CHILDREN".parse::<Status>().unwrap(), Status::WaitingChildren);
		assert!(Status::Done.is_terminal());
		assert!(!Status::Pending.is_terminal());
		assert!("BOGUS".parse::<Status>().is_err());
	}
}
