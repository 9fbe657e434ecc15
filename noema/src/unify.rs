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

//! Unification and substitution.
//!
//! `unify(a, b)` produces a substitution σ with σ(a) ≡ σ(b), or `None`.
//! Failure is routine control flow and never surfaces as an error. Both
//! directions perform the occurs check; substitution application is bounded
//! by a depth cap and shares unchanged subtrees.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::term::{Term, TermKind};

/// Maximum recursion depth when applying a substitution. Bindings deeper
/// than this are left unresolved rather than chasing pathological chains.
pub const APPLY_DEPTH_LIMIT: usize = 64;

/// A mapping from variable names to terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subst {
	map: HashMap<Arc<str>, Term>,
}

impl Subst {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn get(&self, var: &str) -> Option<&Term> {
		self.map.get(var)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Term)> {
		self.map.iter()
	}

	/// Resolve a term one binding at a time until it is not a bound variable.
	fn walk(&self, term: &Term) -> Term {
		let mut current = term.clone();
		for _ in 0..APPLY_DEPTH_LIMIT {
			match current.as_var() {
				Some(name) => match self.map.get(name.as_ref()) {
					Some(next) => current = next.clone(),
					None => return current,
				},
				None => return current,
			}
		}
		current
	}

	/// Does `var` occur in `term` under this substitution?
	fn occurs(&self, var: &str, term: &Term) -> bool {
		let term = self.walk(term);
		match term.kind() {
			TermKind::Var(v) => v.as_ref() == var,
			TermKind::Compound(_, args) | TermKind::List(args) => args.iter().any(|a| self.occurs(var, a)),
			_ => false,
		}
	}

	/// Bind `var ↦ term`, failing the occurs check if the binding would be
	/// cyclic.
	fn bind(&mut self, var: Arc<str>, term: Term) -> bool {
		if self.occurs(&var, &term) {
			return false;
		}
		self.map.insert(var, term);
		true
	}

	/// Apply the substitution to `term`. Unchanged subtrees are returned as
	/// is; no fresh allocation happens unless a variable was actually
	/// replaced.
	pub fn apply(&self, term: &Term) -> Term {
		self.apply_depth(term, 0)
	}

	fn apply_depth(&self, term: &Term, depth: usize) -> Term {
		if depth >= APPLY_DEPTH_LIMIT || (term.is_ground() && !term.is_var()) {
			return term.clone();
		}
		match term.kind() {
			TermKind::Var(_) => {
				let walked = self.walk(term);
				if walked.is_var() || walked == *term {
					walked
				} else {
					self.apply_depth(&walked, depth + 1)
				}
			}
			TermKind::Compound(head, args) => {
				let new_args: Vec<Term> = args.iter().map(|a| self.apply_depth(a, depth + 1)).collect();
				if new_args.iter().zip(args.iter()).all(|(n, o)| n == o) {
					term.clone()
				} else {
					Term::compound(head.as_ref(), new_args)
				}
			}
			TermKind::List(elems) => {
				let new_elems: Vec<Term> = elems.iter().map(|e| self.apply_depth(e, depth + 1)).collect();
				if new_elems.iter().zip(elems.iter()).all(|(n, o)| n == o) {
					term.clone()
				} else {
					Term::list(new_elems)
				}
			}
			_ => term.clone(),
		}
	}
}

/// Bidirectional unification starting from an existing substitution.
pub fn unify_with(a: &Term, b: &Term, subst: Subst) -> Option<Subst> {
	solve(a, b, subst, Mode::Unify)
}

/// Bidirectional unification.
pub fn unify(a: &Term, b: &Term) -> Option<Subst> {
	solve(a, b, Subst::new(), Mode::Unify)
}

/// One-way matching: only variables of `pattern` may be bound. Variables in
/// `instance` behave as constants.
pub fn match_pattern(pattern: &Term, instance: &Term) -> Option<Subst> {
	solve(pattern, instance, Subst::new(), Mode::Match)
}

/// One-way matching extending an existing substitution.
pub fn match_with(pattern: &Term, instance: &Term, subst: Subst) -> Option<Subst> {
	solve(pattern, instance, subst, Mode::Match)
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
	Unify,
	Match,
}

fn solve(a: &Term, b: &Term, mut subst: Subst, mode: Mode) -> Option<Subst> {
	// iterative worklist; (left, right) pairs still to reconcile
	let mut stack: Vec<(Term, Term)> = vec![(a.clone(), b.clone())];

	while let Some((left, right)) = stack.pop() {
		let left = subst.walk(&left);
		let right = subst.walk(&right);

		if left == right {
			continue;
		}

		match (left.kind(), right.kind()) {
			(TermKind::Var(v), _) => {
				if !subst.bind(v.clone(), right) {
					return None;
				}
			}
			(_, TermKind::Var(v)) if mode == Mode::Unify => {
				if !subst.bind(v.clone(), left) {
					return None;
				}
			}
			(TermKind::Compound(h1, args1), TermKind::Compound(h2, args2)) => {
				if h1 != h2 || args1.len() != args2.len() {
					return None;
				}
				for (x, y) in args1.iter().zip(args2.iter()) {
					stack.push((x.clone(), y.clone()));
				}
			}
			(TermKind::List(e1), TermKind::List(e2)) => {
				if e1.len() != e2.len() {
					return None;
				}
				for (x, y) in e1.iter().zip(e2.iter()) {
					stack.push((x.clone(), y.clone()));
				}
			}
			_ => return None,
		}
	}
	Some(subst)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::parse::parse_term;

	fn t(src: &str) -> Term {
		parse_term(src).unwrap()
	}

	#[test]
	fn unify_binds_both_sides() {
		let subst = unify(&t("(p ?x b)"), &t("(p a ?y)")).unwrap();
		assert_eq!(subst.apply(&t("(p ?x b)")), subst.apply(&t("(p a ?y)")));
		assert_eq!(subst.apply(&t("?x")), t("a"));
		assert_eq!(subst.apply(&t("?y")), t("b"));
	}

	#[test]
	fn unify_is_canonical() {
		let s1 = unify(&t("(p ?x (q ?x))"), &t("(p a ?z)")).unwrap();
		let s2 = unify(&t("(p ?x (q ?x))"), &t("(p a ?z)")).unwrap();
		assert_eq!(s1, s2);
		assert_eq!(s1.apply(&t("?z")), t("(q a)"));
	}

	#[test]
	fn arity_and_head_mismatch_fail() {
		assert!(unify(&t("(p a)"), &t("(p a b)")).is_none());
		assert!(unify(&t("(p a)"), &t("(q a)")).is_none());
		assert!(unify(&t("(list a)"), &t("(list a b)")).is_none());
		assert!(unify(&t("1"), &t("2")).is_none());
	}

	#[test]
	fn occurs_check_fails() {
		assert!(unify(&t("?x"), &t("(f ?x)")).is_none());
		// and through an intermediate binding
		assert!(unify(&t("(p ?x ?x)"), &t("(p ?y (f ?y))")).is_none());
	}

	#[test]
	fn match_is_one_way() {
		let subst = match_pattern(&t("(p ?x)"), &t("(p a)")).unwrap();
		assert_eq!(subst.apply(&t("?x")), t("a"));

		// instance variables are constants: pattern symbol vs instance var fails
		assert!(match_pattern(&t("(p a)"), &t("(p ?v)")).is_none());
		// but a pattern variable may still capture one
		let s = match_pattern(&t("(p ?x)"), &t("(p ?v)")).unwrap();
		assert_eq!(s.apply(&t("?x")), t("?v"));
	}

	#[test]
	fn apply_shares_unchanged_subtrees() {
		let subst = unify(&t("?x"), &t("a")).unwrap();
		let ground = t("(p b c)");
		let applied = subst.apply(&ground);
		assert_eq!(ground, applied);
	}

	#[test]
	fn shared_variable_chains_resolve() {
		let mut subst = unify(&t("?x"), &t("?y")).unwrap();
		subst = unify_with(&t("?y"), &t("(f c)"), subst).unwrap();
		assert_eq!(subst.apply(&t("(g ?x)")), t("(g (f c))"));
	}
}
