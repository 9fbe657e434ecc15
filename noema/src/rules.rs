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

//! Rewrite-rule registry.
//!
//! Rules arrive as terms of the form `(implies A C)` or `(equivalent A C)`.
//! An equivalence expands into both implication directions at registration.
//! Lookup is keyed by the predicate of each antecedent clause, so the
//! forward chainer can fetch candidate rules for a new item in O(1)
//! amortized.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::{
	error::{NoemaError, Result},
	term::Term,
};

pub const IMPLIES: &str = "implies";
pub const EQUIVALENT: &str = "equivalent";
pub const AND: &str = "and";
pub const NOT: &str = "not";
pub const TRUE: &str = "true";

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
	/// Canonical printed `(implies …)` form; doubles as the rule's identity.
	pub id: String,
	pub form: Term,
	/// Antecedent clauses; empty for facts guarded by the literal `true`.
	pub antecedents: Vec<Term>,
	pub consequent: Term,
	pub base_priority: f64,
}

impl Rule {
	fn from_implication(antecedent: &Term, consequent: &Term, priority: f64) -> Rule {
		let form = Term::compound(IMPLIES, vec![antecedent.clone(), consequent.clone()]);
		Rule {
			id: form.to_string(),
			form,
			antecedents: split_conjunction(antecedent),
			consequent: consequent.clone(),
			base_priority: priority,
		}
	}
}

/// Split `(and a b c)` into clauses; the literal `true` guards a fact and
/// contributes no clauses.
pub fn split_conjunction(term: &Term) -> Vec<Term> {
	if term.as_symbol() == Some(TRUE) {
		return Vec::new();
	}
	if term.head() == Some(AND) && !term.args().is_empty() {
		return term.args().iter().flat_map(split_conjunction).collect();
	}
	vec![term.clone()]
}

/// The predicate a clause is filed under: its head, looking through one
/// level of negation.
pub fn clause_predicate(clause: &Term) -> Option<&str> {
	if clause.head() == Some(NOT) && clause.args().len() == 1 {
		return clause.args()[0].head();
	}
	clause.head()
}

#[derive(Debug, Default)]
pub struct RuleStore {
	by_id: HashMap<String, Arc<Rule>>,
	by_predicate: HashMap<String, Vec<Arc<Rule>>>,
}

impl RuleStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.by_id.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_id.is_empty()
	}

	/// Register a rule term. Equivalences register both directions.
	/// Returns the newly added rules; re-registering an identical form is a
	/// no-op.
	pub fn add(&mut self, term: &Term, priority: f64) -> Result<Vec<Arc<Rule>>> {
		let rules = match term.head() {
			Some(IMPLIES) if term.args().len() == 2 => {
				vec![Rule::from_implication(&term.args()[0], &term.args()[1], priority)]
			}
			Some(EQUIVALENT) if term.args().len() == 2 => vec![
				Rule::from_implication(&term.args()[0], &term.args()[1], priority),
				Rule::from_implication(&term.args()[1], &term.args()[0], priority),
			],
			_ => return Err(NoemaError::Parse(format!("not a rule form: `{}`", term))),
		};

		let mut added = Vec::new();
		for rule in rules {
			if self.by_id.contains_key(&rule.id) {
				continue;
			}
			let rule = Arc::new(rule);
			self.by_id.insert(rule.id.clone(), rule.clone());
			for clause in &rule.antecedents {
				if let Some(pred) = clause_predicate(clause) {
					self.by_predicate.entry(pred.to_string()).or_default().push(rule.clone());
				}
			}
			added.push(rule);
		}
		Ok(added)
	}

	/// Unregister every rule a rule term registered; the inverse of [`add`].
	///
	/// [`add`]: RuleStore::add
	pub fn remove_term(&mut self, term: &Term) -> Vec<Arc<Rule>> {
		let forms: Vec<Term> = match term.head() {
			Some(IMPLIES) if term.args().len() == 2 => vec![term.clone()],
			Some(EQUIVALENT) if term.args().len() == 2 => vec![
				Term::compound(IMPLIES, vec![term.args()[0].clone(), term.args()[1].clone()]),
				Term::compound(IMPLIES, vec![term.args()[1].clone(), term.args()[0].clone()]),
			],
			_ => return Vec::new(),
		};
		forms.iter().filter_map(|form| self.remove(&form.to_string())).collect()
	}

	pub fn remove(&mut self, id: &str) -> Option<Arc<Rule>> {
		let rule = self.by_id.remove(id)?;
		for clause in &rule.antecedents {
			if let Some(pred) = clause_predicate(clause) {
				if let Some(bucket) = self.by_predicate.get_mut(pred) {
					bucket.retain(|r| r.id != rule.id);
					if bucket.is_empty() {
						self.by_predicate.remove(pred);
					}
				}
			}
		}
		Some(rule)
	}

	pub fn get(&self, id: &str) -> Option<&Arc<Rule>> {
		self.by_id.get(id)
	}

	/// Rules with an antecedent clause filed under `predicate`.
	pub fn for_predicate(&self, predicate: &str) -> &[Arc<Rule>] {
		self.by_predicate.get(predicate).map(Vec::as_slice).unwrap_or(&[])
	}

	pub fn iter(&self) -> impl Iterator<Item = &Arc<Rule>> {
		self.by_id.values()
	}
}
