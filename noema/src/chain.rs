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

//! Derivation listeners: forward chaining, demodulation and universal
//! instantiation.
//!
//! All three consume `Added` events and commit their conclusions back
//! through the knowledge base, so idempotence, subsumption and capacity
//! apply to derived knowledge exactly as to injected knowledge. Derivation
//! depth and derived-term weight are capped to keep the closure finite.

use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};

use hashbrown::HashSet;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::{
	bus::Event,
	kb::KnowledgeBase,
	rules::{self, Rule, RuleStore},
	term::{Term, TermKind},
	types::{Confidence, Item, ItemId, MetaValue, Role},
	unify::{match_pattern, unify_with, Subst},
};

pub const FORALL: &str = "forall";
pub const EXISTS: &str = "exists";
pub const EQUALS: &str = "=";

/// Metadata key recording how many derivation steps produced an item.
pub const DERIVATION_DEPTH: &str = "derivation_depth";

#[derive(Clone, Debug, Deserialize)]
pub struct ChainConfig {
	/// Maximum derivation depth for chained conclusions.
	#[serde(default = "default_max_depth")]
	pub max_depth: u32,
	/// Derived terms heavier than this are dropped.
	#[serde(default = "default_max_term_weight")]
	pub max_term_weight: u32,
	/// Cap on complete antecedent bindings explored per rule firing.
	#[serde(default = "default_max_bindings")]
	pub max_bindings: usize,
}

impl Default for ChainConfig {
	fn default() -> Self {
		Self {
			max_depth: default_max_depth(),
			max_term_weight: default_max_term_weight(),
			max_bindings: default_max_bindings(),
		}
	}
}

const fn default_max_depth() -> u32 {
	4
}

const fn default_max_term_weight() -> u32 {
	150
}

const fn default_max_bindings() -> usize {
	16
}

fn derivation_depth(item: &Item) -> u32 {
	item.metadata.get(DERIVATION_DEPTH).and_then(MetaValue::as_num).unwrap_or(0.0) as u32
}

#[derive(Debug, Clone)]
struct Equality {
	lhs: Term,
	rhs: Term,
	source: ItemId,
}

#[derive(Debug, Clone)]
struct Universal {
	source: ItemId,
	vars: Vec<Arc<str>>,
	body: Term,
}

/// Split a quantified term `(forall (list ?x …) body)` into its variables
/// and body.
fn quantifier_parts(term: &Term, kind: &str) -> Option<(Vec<Arc<str>>, Term)> {
	if term.head() != Some(kind) || term.args().len() != 2 {
		return None;
	}
	let binder = &term.args()[0];
	if !matches!(binder.kind(), TermKind::List(_)) {
		return None;
	}
	let vars: Vec<Arc<str>> = binder.args().iter().filter_map(|v| v.as_var().cloned()).collect();
	if vars.len() != binder.args().len() || vars.is_empty() {
		return None;
	}
	Some((vars, term.args()[1].clone()))
}

pub struct Deriver {
	kb: Arc<KnowledgeBase>,
	rules: Arc<RwLock<RuleStore>>,
	config: ChainConfig,
	equalities: RwLock<Vec<Equality>>,
	universals: RwLock<Vec<Universal>>,
	skolem_counter: AtomicU64,
}

impl Deriver {
	pub fn new(kb: Arc<KnowledgeBase>, rules: Arc<RwLock<RuleStore>>, config: ChainConfig) -> Self {
		Self {
			kb,
			rules,
			config,
			equalities: RwLock::new(Vec::new()),
			universals: RwLock::new(Vec::new()),
			skolem_counter: AtomicU64::new(0),
		}
	}

	/// Drain pending bus events synchronously, following derivations until
	/// the queue is dry.
	pub fn drain(&self, rx: &flume::Receiver<Event>) {
		while let Ok(event) = rx.try_recv() {
			self.on_event(&event);
		}
	}

	pub fn on_event(&self, event: &Event) {
		match event {
			Event::Added(item) => self.on_added(item),
			Event::Retracted(item) | Event::Evicted(item) => self.on_removed(item),
			_ => {}
		}
	}

	/// Process everything already in the KB as if freshly added. Used at
	/// startup, when this listener attaches after a snapshot restore or a
	/// rule-file load; knowledge-base idempotence makes re-derivation a
	/// no-op.
	pub fn catch_up(&self) {
		for item in self.kb.items() {
			self.on_added(&item);
		}
	}

	fn on_added(&self, item: &Arc<Item>) {
		if item.role == Role::Meta {
			return;
		}
		let content = &item.content;

		match content.head() {
			Some(rules::IMPLIES) | Some(rules::EQUIVALENT) if content.args().len() == 2 => {
				self.register_rule(item);
				return;
			}
			Some(EQUALS) if content.args().len() == 2 => {
				self.register_equality(item);
				return;
			}
			Some(FORALL) => {
				if let Some((vars, body)) = quantifier_parts(content, FORALL) {
					self.register_universal(item, vars, body);
					return;
				}
			}
			_ => {}
		}

		self.forward_chain(item);
		self.apply_equalities(item);
		self.instantiate_universals(item);
	}

	/// Reverse whatever structure a removed item registered.
	fn on_removed(&self, item: &Arc<Item>) {
		for rule in self.rules.write().remove_term(&item.content) {
			self.kb.bus().publish(Event::RuleRemoved(rule.id.clone()));
		}
		self.equalities.write().retain(|eq| eq.source != item.id);
		self.universals.write().retain(|u| u.source != item.id);
	}

	fn register_rule(&self, item: &Arc<Item>) {
		let added = match self.rules.write().add(&item.content, item.belief.score()) {
			Ok(added) => added,
			Err(e) => {
				log::warn!("rejecting malformed rule {}: {}", item.content, e);
				return;
			}
		};
		for rule in added {
			self.kb.bus().publish(Event::RuleAdded(rule.clone()));
			// chase the rule against knowledge that arrived before it
			self.fire_rule(&rule, None, Subst::new(), &[item.id]);
		}
	}

	fn register_equality(&self, item: &Arc<Item>) {
		let (lhs, rhs) = (&item.content.args()[0], &item.content.args()[1]);
		// orient heavier-to-lighter; equal weight reads left-to-right
		let (lhs, rhs) = if lhs.weight() >= rhs.weight() { (lhs, rhs) } else { (rhs, lhs) };
		if lhs.is_var() {
			return;
		}
		let eq = Equality { lhs: lhs.clone(), rhs: rhs.clone(), source: item.id };

		// demodulate what we already believe
		for existing in self.kb.items() {
			self.rewrite_item(&existing, &eq);
		}
		self.equalities.write().push(eq);
	}

	fn register_universal(&self, item: &Arc<Item>, vars: Vec<Arc<str>>, body: Term) {
		let universal = Universal { source: item.id, vars, body };
		for existing in self.kb.items() {
			if existing.content.is_ground() {
				self.instantiate_one(&universal, &existing);
			}
		}
		self.universals.write().push(universal);
	}

	/// Fire every rule with an antecedent clause unifying the new item,
	/// completing the remaining clauses against the knowledge base.
	fn forward_chain(&self, item: &Arc<Item>) {
		if derivation_depth(item) >= self.config.max_depth {
			return;
		}
		let predicate = match rules::clause_predicate(&item.content) {
			Some(p) => p.to_string(),
			None => return,
		};
		let candidates: Vec<Arc<Rule>> = self.rules.read().for_predicate(&predicate).to_vec();

		for rule in candidates {
			for (clause_idx, clause) in rule.antecedents.iter().enumerate() {
				let bindings = match unify_with(clause, &item.content, Subst::new()) {
					Some(b) => b,
					None => continue,
				};
				self.fire_rule(&rule, Some(clause_idx), bindings, &[item.id]);
			}
		}
	}

	fn fire_rule(&self, rule: &Arc<Rule>, skip: Option<usize>, seed: Subst, support: &[ItemId]) {
		let remaining: Vec<Term> = rule
			.antecedents
			.iter()
			.enumerate()
			.filter(|(i, _)| Some(*i) != skip)
			.map(|(_, c)| c.clone())
			.collect();
		let mut complete = Vec::new();
		self.satisfy(&remaining, seed, support.to_vec(), &mut complete);

		for (bindings, support) in complete {
			let conclusion = bindings.apply(&rule.consequent);
			let depth = self.support_depth(&support) + 1;
			self.commit_conclusions(&conclusion, depth, &support);
		}
	}

	/// Recursively complete antecedent clauses against the KB, collecting
	/// at most `max_bindings` full substitutions with their support.
	fn satisfy(&self, clauses: &[Term], bindings: Subst, support: Vec<ItemId>, out: &mut Vec<(Subst, Vec<ItemId>)>) {
		if out.len() >= self.config.max_bindings {
			return;
		}
		let (clause, rest) = match clauses.split_first() {
			None => {
				out.push((bindings, support));
				return;
			}
			Some(split) => split,
		};

		let goal = bindings.apply(clause);
		for (matched, _) in self.kb.query(&goal) {
			if let Some(extended) = unify_with(&goal, &matched.content, bindings.clone()) {
				let mut support = support.clone();
				support.push(matched.id);
				self.satisfy(rest, extended, support, out);
				if out.len() >= self.config.max_bindings {
					return;
				}
			}
		}
	}

	fn support_depth(&self, support: &[ItemId]) -> u32 {
		support.iter().filter_map(|id| self.kb.get(*id)).map(|i| derivation_depth(&i)).max().unwrap_or(0)
	}

	/// Commit a conclusion, expanding conjunctions and handling quantifiers.
	fn commit_conclusions(&self, conclusion: &Term, depth: u32, support: &[ItemId]) {
		if depth > self.config.max_depth {
			return;
		}
		if conclusion.head() == Some(rules::AND) && !conclusion.args().is_empty() {
			for part in conclusion.args() {
				self.commit_conclusions(part, depth, support);
			}
			return;
		}
		if let Some((vars, body)) = quantifier_parts(conclusion, EXISTS) {
			let skolemized = self.skolemize(&vars, &body);
			self.commit_derived(skolemized, depth, support);
			return;
		}
		// universals install as-is and register when their Added event loops
		// back through this listener
		self.commit_derived(conclusion.clone(), depth, support);
	}

	/// Replace each existentially bound variable with a fresh skolem functor
	/// over the body's remaining free variables.
	fn skolemize(&self, vars: &[Arc<str>], body: &Term) -> Term {
		let bound: HashSet<&Arc<str>> = vars.iter().collect();
		let free: Vec<Term> =
			body.variables().into_iter().filter(|v| !bound.contains(v)).map(Term::var).collect();

		let mut bindings = Subst::new();
		for var in vars {
			let n = self.skolem_counter.fetch_add(1, Ordering::SeqCst);
			let functor = format!("sk{}", n);
			let skolem =
				if free.is_empty() { Term::symbol(functor) } else { Term::compound(functor, free.clone()) };
			bindings = unify_with(&Term::var(var.as_ref()), &skolem, bindings).expect("fresh skolem binding");
		}
		bindings.apply(body)
	}

	fn commit_derived(&self, term: Term, depth: u32, support: &[ItemId]) {
		if term.weight() > self.config.max_term_weight {
			log::debug!("dropping over-weight derivation ({} nodes)", term.weight());
			return;
		}
		let provenance: Vec<String> = support.iter().map(ItemId::to_string).collect();
		let item = Item::new(Role::Note, term, Confidence::default())
			.with_provenance(provenance)
			.with_meta(DERIVATION_DEPTH, MetaValue::Num(f64::from(depth)));
		self.kb.add(item);
	}

	/// Apply every registered oriented equality to a newly added item.
	fn apply_equalities(&self, item: &Arc<Item>) {
		let equalities = self.equalities.read().clone();
		for eq in &equalities {
			self.rewrite_item(item, eq);
		}
	}

	fn rewrite_item(&self, item: &Arc<Item>, eq: &Equality) {
		if item.id == eq.source || item.role == Role::Meta {
			return;
		}
		// equality facts themselves are not rewritten; that way lies loops
		if item.content.head() == Some(EQUALS) {
			return;
		}
		let depth = derivation_depth(item);
		if depth >= self.config.max_depth {
			return;
		}
		if let Some(rewritten) = rewrite_once(&item.content, eq) {
			self.commit_derived(rewritten, depth + 1, &[item.id, eq.source]);
		}
	}

	/// Instantiate known universals from sub-expressions of a ground item.
	fn instantiate_universals(&self, item: &Arc<Item>) {
		if !item.content.is_ground() {
			return;
		}
		let universals = self.universals.read().clone();
		for universal in &universals {
			self.instantiate_one(universal, item);
		}
	}

	fn instantiate_one(&self, universal: &Universal, item: &Arc<Item>) {
		if item.id == universal.source {
			return;
		}
		let depth = derivation_depth(item);
		if depth >= self.config.max_depth {
			return;
		}

		let clauses = body_clauses(&universal.body);
		let subterms = item.content.subterms();
		for clause in &clauses {
			for sub in &subterms {
				let bindings = match match_pattern(clause, sub) {
					Some(b) => b,
					None => continue,
				};
				if !universal.vars.iter().all(|v| bindings.get(v).is_some()) {
					continue;
				}
				let instance = bindings.apply(&universal.body);
				if instance.is_ground() {
					self.commit_derived(instance, depth + 1, &[item.id, universal.source]);
				}
			}
		}
	}
}

/// The matchable clauses of a universal's body: both sides of an
/// implication or equivalence, conjunctions flattened.
fn body_clauses(body: &Term) -> Vec<Term> {
	match body.head() {
		Some(rules::IMPLIES) | Some(rules::EQUIVALENT) if body.args().len() == 2 => {
			let mut clauses = rules::split_conjunction(&body.args()[0]);
			clauses.extend(rules::split_conjunction(&body.args()[1]));
			clauses
		}
		_ => rules::split_conjunction(body),
	}
}

/// One leftmost-outermost rewrite of `term` by the oriented equality, or
/// `None` if the left side matches nowhere.
fn rewrite_once(term: &Term, eq: &Equality) -> Option<Term> {
	if let Some(bindings) = match_pattern(&eq.lhs, term) {
		let replacement = bindings.apply(&eq.rhs);
		if replacement != *term {
			return Some(replacement);
		}
	}
	let args = term.args();
	for (i, arg) in args.iter().enumerate() {
		if let Some(rewritten) = rewrite_once(arg, eq) {
			let mut new_args = args.to_vec();
			new_args[i] = rewritten;
			let head = term.head().expect("compound has a head");
			return Some(match term.kind() {
				TermKind::List(_) => Term::list(new_args),
				_ => Term::compound(head, new_args),
			});
		}
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{bus::EventBus, kb::KbConfig, parse::parse_term};

	fn t(src: &str) -> Term {
		parse_term(src).unwrap()
	}

	struct Fixture {
		kb: Arc<KnowledgeBase>,
		deriver: Deriver,
		rx: flume::Receiver<Event>,
	}

	impl Fixture {
		fn new() -> Self {
			let bus = EventBus::new();
			let rx = bus.subscribe();
			let kb = Arc::new(KnowledgeBase::new(KbConfig::default(), bus));
			let rules = Arc::new(RwLock::new(RuleStore::new()));
			let deriver = Deriver::new(kb.clone(), rules, ChainConfig::default());
			Self { kb, deriver, rx }
		}

		fn inject(&self, src: &str) {
			self.kb.add(Item::new(Role::Note, t(src), Confidence::default()));
			self.deriver.drain(&self.rx);
		}

		fn holds(&self, src: &str) -> bool {
			let term = t(src);
			self.kb.items().iter().any(|i| i.content == term)
		}

		fn count(&self, src: &str) -> usize {
			let term = t(src);
			self.kb.items().iter().filter(|i| i.content == term).count()
		}
	}

	#[test]
	fn forward_chain_fires_on_new_fact() {
		let fx = Fixture::new();
		fx.inject("(implies (man ?x) (mortal ?x))");
		fx.inject("(man socrates)");
		assert!(fx.holds("(mortal socrates)"));
	}

	#[test]
	fn forward_chain_fires_on_late_rule() {
		let fx = Fixture::new();
		fx.inject("(man socrates)");
		fx.inject("(implies (man ?x) (mortal ?x))");
		assert!(fx.holds("(mortal socrates)"));
	}

	#[test]
	fn conjunctive_antecedent_completes_from_kb() {
		let fx = Fixture::new();
		fx.inject("(implies (and (parent ?x ?y) (parent ?y ?z)) (grandparent ?x ?z))");
		fx.inject("(parent abe homer)");
		assert!(!fx.holds("(grandparent abe bart)"));
		fx.inject("(parent homer bart)");
		assert!(fx.holds("(grandparent abe bart)"));
	}

	#[test]
	fn conjunctive_consequent_fans_out() {
		let fx = Fixture::new();
		fx.inject("(implies (penguin ?x) (and (bird ?x) (flightless ?x)))");
		fx.inject("(penguin pingu)");
		assert!(fx.holds("(bird pingu)"));
		assert!(fx.holds("(flightless pingu)"));
	}

	#[test]
	fn existential_consequent_skolemizes() {
		let fx = Fixture::new();
		fx.inject("(implies (person ?x) (exists (list ?m) (mother ?x ?m)))");
		fx.inject("(person eve)");

		let skolemized: Vec<Arc<Item>> = fx
			.kb
			.items()
			.into_iter()
			.filter(|i| i.content.head() == Some("mother"))
			.collect();
		assert_eq!(skolemized.len(), 1);
		let args = skolemized[0].content.args();
		assert_eq!(args[0], t("eve"));
		assert!(args[1].is_ground());
		assert!(args[1].head().unwrap().starts_with("sk"));
	}

	#[test]
	fn peano_sum_normalizes() {
		let fx = Fixture::new();
		fx.inject("(= (add Z ?n) ?n)");
		fx.inject("(= (add (S ?m) ?n) (S (add ?m ?n)))");
		fx.inject("(add (S (S Z)) (S Z))");

		assert_eq!(fx.count("(S (S (S Z)))"), 1);
	}

	#[test]
	fn rewrite_records_both_supports() {
		let fx = Fixture::new();
		fx.inject("(= (f a) b)");
		fx.inject("(p (f a))");
		assert!(fx.holds("(p b)"));

		let eq_id = fx.kb.items().iter().find(|i| i.content == t("(= (f a) b)")).unwrap().id;
		let fact_id = fx.kb.items().iter().find(|i| i.content == t("(p (f a))")).unwrap().id;
		let derived = fx.kb.items().into_iter().find(|i| i.content == t("(p b)")).unwrap();
		assert!(derived.supported_by(eq_id));
		assert!(derived.supported_by(fact_id));
	}

	#[test]
	fn rewrite_applies_to_pre_existing_facts() {
		let fx = Fixture::new();
		fx.inject("(p (f a))");
		fx.inject("(= (f a) b)");
		assert!(fx.holds("(p b)"));
	}

	#[test]
	fn universal_instantiates_from_ground_item() {
		let fx = Fixture::new();
		fx.inject("(forall (list ?x) (implies (raven ?x) (black ?x)))");
		fx.inject("(raven poe)");
		assert!(fx.holds("(implies (raven poe) (black poe))"));
	}

	#[test]
	fn retracted_equality_stops_rewriting() {
		let fx = Fixture::new();
		fx.inject("(= (f a) b)");
		let eq_id = fx.kb.items().iter().find(|i| i.content == t("(= (f a) b)")).unwrap().id;
		fx.kb.remove(eq_id);
		fx.deriver.drain(&fx.rx);

		fx.inject("(p (f a))");
		assert!(!fx.holds("(p b)"));
	}

	#[test]
	fn retracted_rule_stops_firing() {
		let fx = Fixture::new();
		fx.inject("(implies (man ?x) (mortal ?x))");
		let rule_id = fx.kb.items().iter().find(|i| i.content.head() == Some("implies")).unwrap().id;
		fx.kb.remove(rule_id);
		fx.deriver.drain(&fx.rx);

		fx.inject("(man socrates)");
		assert!(!fx.holds("(mortal socrates)"));
	}

	#[test]
	fn depth_cap_stops_runaway_chains() {
		let fx = Fixture::new();
		fx.inject("(implies (n ?x) (n (s ?x)))");
		fx.inject("(n zero)");

		let deepest = fx
			.kb
			.items()
			.iter()
			.filter(|i| i.content.head() == Some("n"))
			.map(|i| derivation_depth(i))
			.max()
			.unwrap();
		assert!(deepest <= ChainConfig::default().max_depth);
	}
}
