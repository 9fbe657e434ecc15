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

//! The knowledge base.
//!
//! Items live in concurrent maps guarded by a single `parking_lot` lock
//! held only for structural updates; every state transition goes through
//! compare-and-set against the exact value the caller read. The KB also
//! maintains the path index, a children index and the support map used for
//! cascaded retraction, and publishes every mutation on the event bus
//! after the lock is released.

use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;
use rand::Rng;
use serde::Deserialize;

use crate::{
	bus::{Event, EventBus},
	index::{PathIndex, SearchMode},
	term::Term,
	types::{now_millis, Item, ItemId, Role, Status},
	unify::{unify, Subst},
};

#[derive(Clone, Debug, Deserialize)]
pub struct KbConfig {
	/// Capacity ceiling; crossing it schedules a forgetting pass.
	#[serde(default = "default_max_size")]
	pub max_size: usize,
	/// Maximum matches returned by a single query.
	#[serde(default = "default_max_results")]
	pub max_results: usize,
	/// Eviction floor: items whose blended importance falls below this are
	/// the first to go under pressure.
	#[serde(default = "default_min_importance")]
	pub min_importance: f64,
	#[serde(default = "default_sti_decay")]
	pub sti_decay: f64,
	#[serde(default = "default_lti_decay")]
	pub lti_decay: f64,
	#[serde(default = "default_lti_learn")]
	pub lti_learn: f64,
	/// STI boost applied when an item is sampled.
	#[serde(default = "default_access_boost")]
	pub access_boost: f64,
	/// Confidence delta above which a revision boosts importance.
	#[serde(default = "default_revision_delta")]
	pub revision_delta: f64,
	/// Predicates for which `(p x x)` is trivially true and not stored.
	#[serde(default = "default_reflexive_predicates")]
	pub reflexive_predicates: Vec<String>,
	/// Symbols whose items are never evicted or collected.
	#[serde(default)]
	pub protected_symbols: Vec<String>,
}

impl Default for KbConfig {
	fn default() -> Self {
		Self {
			max_size: default_max_size(),
			max_results: default_max_results(),
			min_importance: default_min_importance(),
			sti_decay: default_sti_decay(),
			lti_decay: default_lti_decay(),
			lti_learn: default_lti_learn(),
			access_boost: default_access_boost(),
			revision_delta: default_revision_delta(),
			reflexive_predicates: default_reflexive_predicates(),
			protected_symbols: Vec::new(),
		}
	}
}

const fn default_max_size() -> usize {
	65_536
}

const fn default_max_results() -> usize {
	64
}

fn default_min_importance() -> f64 {
	0.02
}

fn default_sti_decay() -> f64 {
	0.1
}

fn default_lti_decay() -> f64 {
	0.01
}

fn default_lti_learn() -> f64 {
	0.2
}

fn default_access_boost() -> f64 {
	0.1
}

fn default_revision_delta() -> f64 {
	0.05
}

fn default_reflexive_predicates() -> Vec<String> {
	vec!["=".into(), "same".into(), "equal".into()]
}

#[derive(Default)]
struct KbInner {
	items: HashMap<ItemId, Arc<Item>>,
	by_term: HashMap<Term, ItemId>,
	index: PathIndex,
	children: HashMap<ItemId, Vec<ItemId>>,
	/// supporter id → items whose provenance mentions it
	dependents: HashMap<ItemId, Vec<ItemId>>,
	protected: HashSet<ItemId>,
}

impl KbInner {
	fn link(&mut self, item: &Arc<Item>) {
		self.by_term.insert(item.content.clone(), item.id);
		self.index.insert(&item.content, item.id);
		if let Some(parent) = item.parent_id() {
			self.children.entry(parent).or_default().push(item.id);
		}
		for source in item.provenance() {
			if let Ok(supporter) = source.parse::<ItemId>() {
				self.dependents.entry(supporter).or_default().push(item.id);
			}
		}
	}

	fn unlink(&mut self, item: &Arc<Item>) {
		if self.by_term.get(&item.content) == Some(&item.id) {
			self.by_term.remove(&item.content);
		}
		self.index.remove(&item.content, item.id);
		if let Some(parent) = item.parent_id() {
			if let Some(siblings) = self.children.get_mut(&parent) {
				siblings.retain(|c| *c != item.id);
				if siblings.is_empty() {
					self.children.remove(&parent);
				}
			}
		}
		for source in item.provenance() {
			if let Ok(supporter) = source.parse::<ItemId>() {
				if let Some(deps) = self.dependents.get_mut(&supporter) {
					deps.retain(|d| *d != item.id);
					if deps.is_empty() {
						self.dependents.remove(&supporter);
					}
				}
			}
		}
		self.protected.remove(&item.id);
	}
}

pub struct KnowledgeBase {
	inner: RwLock<KbInner>,
	bus: EventBus,
	config: KbConfig,
	next_id: AtomicU64,
}

impl KnowledgeBase {
	pub fn new(config: KbConfig, bus: EventBus) -> Self {
		Self { inner: RwLock::new(KbInner::default()), bus, config, next_id: AtomicU64::new(1) }
	}

	pub fn config(&self) -> &KbConfig {
		&self.config
	}

	pub fn bus(&self) -> &EventBus {
		&self.bus
	}

	pub fn len(&self) -> usize {
		self.inner.read().items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn is_over_capacity(&self) -> bool {
		self.len() > self.config.max_size
	}

	fn fresh_id(&self) -> ItemId {
		ItemId(self.next_id.fetch_add(1, Ordering::SeqCst))
	}

	/// The next id that would be handed out; persisted so restored engines
	/// never reuse ids.
	pub fn id_watermark(&self) -> u64 {
		self.next_id.load(Ordering::SeqCst)
	}

	pub fn set_id_watermark(&self, watermark: u64) {
		self.next_id.fetch_max(watermark, Ordering::SeqCst);
	}

	fn is_trivial(&self, content: &Term) -> bool {
		let args = content.args();
		args.len() == 2
			&& args[0] == args[1]
			&& content.head().map_or(false, |h| self.config.reflexive_predicates.iter().any(|p| p == h))
	}

	/// Commit a candidate item.
	///
	/// Trivial reflexive content is rejected with `None`. Committing a term
	/// the KB already holds is idempotent: the existing item comes back with
	/// a refreshed `updated_at` and no event is published.
	pub fn add(&self, mut item: Item) -> Option<Arc<Item>> {
		if self.is_trivial(&item.content) {
			log::debug!("rejecting trivial content {}", item.content);
			return None;
		}

		let committed = {
			let mut inner = self.inner.write();
			if let Some(existing_id) = inner.by_term.get(&item.content).copied() {
				let existing = inner.items.get(&existing_id)?.clone();
				let mut refreshed = (*existing).clone();
				refreshed.updated_at = now_millis();
				let refreshed = Arc::new(refreshed);
				inner.items.insert(existing_id, refreshed.clone());
				return Some(refreshed);
			}

			item.id = self.fresh_id();
			let item = Arc::new(item);
			inner.items.insert(item.id, item.clone());
			inner.link(&item);
			if self.symbol_protected(&item.content) {
				inner.protected.insert(item.id);
			}
			item
		};

		self.bus.publish(Event::Added(committed.clone()));
		Some(committed)
	}

	/// Re-insert a persisted item verbatim: keeps its id, publishes nothing.
	pub(crate) fn restore(&self, item: Item) {
		let mut inner = self.inner.write();
		self.next_id.fetch_max(item.id.0 + 1, Ordering::SeqCst);
		let item = Arc::new(item);
		inner.items.insert(item.id, item.clone());
		inner.link(&item);
		if self.symbol_protected(&item.content) {
			inner.protected.insert(item.id);
		}
	}

	fn symbol_protected(&self, content: &Term) -> bool {
		content.as_symbol().map_or(false, |s| self.config.protected_symbols.iter().any(|p| p == s))
	}

	pub fn get(&self, id: ItemId) -> Option<Arc<Item>> {
		self.inner.read().items.get(&id).cloned()
	}

	/// Compare-and-set: swap in `new` iff the stored value still equals
	/// `expected`. A losing swap returns `false` and changes nothing; the
	/// caller retries or abandons.
	pub fn update(&self, expected: &Arc<Item>, mut new: Item) -> bool {
		debug_assert_eq!(expected.id, new.id);
		let event = {
			let mut inner = self.inner.write();
			let current = match inner.items.get(&expected.id) {
				Some(c) => c.clone(),
				None => return false,
			};
			if *current != **expected {
				return false;
			}

			// a materially stronger belief surfaces the item again
			if new.belief.score() - expected.belief.score() > self.config.revision_delta {
				new.importance = new.importance.boosted(self.config.access_boost * new.belief.score());
			}
			new.updated_at = now_millis();

			if new.content != expected.content {
				inner.unlink(&current);
			}
			let previous_status = expected.status;
			let new = Arc::new(new);
			inner.items.insert(new.id, new.clone());
			if new.content != expected.content {
				inner.link(&new);
			}

			(previous_status != new.status).then(|| Event::StatusChanged { item: new, previous: previous_status })
		};

		if let Some(event) = event {
			self.bus.publish(event);
		}
		true
	}

	/// Remove an item and, transitively, every item whose provenance chain
	/// mentions it.
	pub fn remove(&self, id: ItemId) -> Option<Arc<Item>> {
		let removed = {
			let mut inner = self.inner.write();
			let mut worklist = vec![id];
			let mut removed = Vec::new();
			while let Some(next) = worklist.pop() {
				let item = match inner.items.remove(&next) {
					Some(i) => i,
					None => continue,
				};
				inner.unlink(&item);
				if let Some(deps) = inner.dependents.remove(&item.id) {
					worklist.extend(deps);
				}
				removed.push(item);
			}
			removed
		};

		let root = removed.first().cloned();
		for item in removed {
			self.bus.publish(Event::Retracted(item));
		}
		root
	}

	/// Sample one PENDING, non-META item with probability proportional to
	/// `belief × importance`. The sampled item's STI gets an access boost.
	pub fn sample_pending(&self) -> Option<Arc<Item>> {
		let chosen = {
			let inner = self.inner.read();
			let eligible: Vec<(Arc<Item>, f64)> = inner
				.items
				.values()
				.filter(|i| i.status == Status::Pending && i.role != Role::Meta)
				.map(|i| (i.clone(), i.belief.score() * i.importance.weight()))
				.filter(|(_, w)| w.is_finite() && *w > 0.0)
				.collect();
			weighted_choice(&eligible)?.clone()
		};

		// boost outside the read lock; a losing race here only costs a boost
		if let Some(current) = self.get(chosen.id) {
			let mut boosted = (*current).clone();
			boosted.importance = boosted.importance.boosted(self.config.access_boost);
			self.update(&current, boosted);
		}
		self.get(chosen.id)
	}

	fn search_budget(&self, kb_len: usize) -> usize {
		1024 + 4 * kb_len
	}

	/// Ranked matches for `pattern`, best belief first, capped at
	/// `max_results`.
	pub fn query(&self, pattern: &Term) -> Vec<(Arc<Item>, Subst)> {
		let inner = self.inner.read();
		let budget = self.search_budget(inner.items.len());
		let candidates = inner.index.search(pattern, SearchMode::Unifiable, budget);
		let mut matches: Vec<(Arc<Item>, Subst)> = candidates
			.into_iter()
			.filter_map(|id| inner.items.get(&id))
			.filter_map(|item| unify(pattern, &item.content).map(|s| (item.clone(), s)))
			.collect();
		matches.sort_by(|(a, _), (b, _)| {
			b.belief.score().partial_cmp(&a.belief.score()).unwrap_or(std::cmp::Ordering::Equal)
		});
		matches.truncate(self.config.max_results);
		matches
	}

	/// Candidate items whose content could be an instance of `pattern`.
	pub fn instances(&self, pattern: &Term) -> Vec<Arc<Item>> {
		let inner = self.inner.read();
		let budget = self.search_budget(inner.items.len());
		inner
			.index
			.search(pattern, SearchMode::Instances, budget)
			.into_iter()
			.filter_map(|id| inner.items.get(&id).cloned())
			.collect()
	}

	/// Candidate items whose content generalizes `term`.
	pub fn generalizations(&self, term: &Term) -> Vec<Arc<Item>> {
		let inner = self.inner.read();
		let budget = self.search_budget(inner.items.len());
		inner
			.index
			.search(term, SearchMode::Generalizations, budget)
			.into_iter()
			.filter_map(|id| inner.items.get(&id).cloned())
			.collect()
	}

	/// All non-FAILED meta items.
	pub fn active_metas(&self) -> Vec<Arc<Item>> {
		let inner = self.inner.read();
		inner.items.values().filter(|i| i.role == Role::Meta && i.status != Status::Failed).cloned().collect()
	}

	pub fn children_of(&self, parent: ItemId) -> Vec<Arc<Item>> {
		let inner = self.inner.read();
		inner
			.children
			.get(&parent)
			.into_iter()
			.flatten()
			.filter_map(|id| inner.items.get(id).cloned())
			.collect()
	}

	pub fn protect(&self, id: ItemId) {
		self.inner.write().protected.insert(id);
	}

	pub fn is_protected(&self, id: ItemId) -> bool {
		self.inner.read().protected.contains(&id)
	}

	/// One forgetting pass: decay every importance, then, while over
	/// capacity, evict the lowest-weighted unprotected, non-ACTIVE items.
	/// Returns the evicted items.
	pub fn forget_pass(&self) -> Vec<Arc<Item>> {
		let evicted = {
			let mut inner = self.inner.write();
			let cfg = &self.config;

			let decayed: Vec<Arc<Item>> = inner
				.items
				.values()
				.map(|item| {
					let mut next = (**item).clone();
					next.importance = next.importance.decayed(cfg.sti_decay, cfg.lti_decay, cfg.lti_learn);
					Arc::new(next)
				})
				.collect();
			for item in decayed {
				inner.items.insert(item.id, item);
			}

			if inner.items.len() <= cfg.max_size {
				return Vec::new();
			}

			let mut candidates: Vec<Arc<Item>> = inner
				.items
				.values()
				.filter(|i| i.status != Status::Active && !inner.protected.contains(&i.id))
				.cloned()
				.collect();
			candidates.sort_by(|a, b| {
				a.importance
					.weight()
					.partial_cmp(&b.importance.weight())
					.unwrap_or(std::cmp::Ordering::Equal)
			});

			let mut evicted = Vec::new();
			for item in candidates {
				let under_capacity = inner.items.len() <= cfg.max_size;
				if under_capacity && item.importance.weight() >= cfg.min_importance {
					break;
				}
				inner.items.remove(&item.id);
				inner.unlink(&item);
				evicted.push(item);
			}
			evicted
		};

		for item in &evicted {
			self.bus.publish(Event::Evicted(item.clone()));
		}
		evicted
	}

	/// Remove terminal items idle since before `cutoff_millis`, skipping
	/// protected ones. Returns the collected items.
	pub fn collect_stale(&self, cutoff_millis: i64) -> Vec<Arc<Item>> {
		let collected = {
			let mut inner = self.inner.write();
			let stale: Vec<Arc<Item>> = inner
				.items
				.values()
				.filter(|i| i.is_terminal() && i.updated_at < cutoff_millis && !inner.protected.contains(&i.id))
				.cloned()
				.collect();
			for item in &stale {
				inner.items.remove(&item.id);
				inner.unlink(item);
			}
			stale
		};

		for item in &collected {
			self.bus.publish(Event::Retracted(item.clone()));
		}
		collected
	}

	/// All live items, unordered.
	pub fn items(&self) -> Vec<Arc<Item>> {
		self.inner.read().items.values().cloned().collect()
	}

	/// Clone out every item, for persistence.
	pub fn snapshot_items(&self) -> Vec<Item> {
		let inner = self.inner.read();
		let mut items: Vec<Item> = inner.items.values().map(|i| (**i).clone()).collect();
		items.sort_by_key(|i| i.id);
		items
	}

	pub fn protected_ids(&self) -> Vec<ItemId> {
		let mut ids: Vec<ItemId> = self.inner.read().protected.iter().copied().collect();
		ids.sort();
		ids
	}
}

/// Pick one entry with probability proportional to its weight; `None` when
/// the weights sum to zero.
pub(crate) fn weighted_choice<T>(weighted: &[(T, f64)]) -> Option<&T> {
	let total: f64 = weighted.iter().map(|(_, w)| w).sum();
	if total <= 0.0 || !total.is_finite() {
		return None;
	}
	let mut remaining = rand::thread_rng().gen_range(0.0..total);
	for (value, weight) in weighted {
		remaining -= weight;
		if remaining <= 0.0 {
			return Some(value);
		}
	}
	weighted.last().map(|(v, _)| v)
}
