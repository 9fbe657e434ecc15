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

//! Path index: a discriminator trie over term positions.
//!
//! Terms flatten into self-delimiting key sequences (heads carry arity), so
//! the trie can answer three candidate queries without touching most of the
//! stored terms: unifiable terms, instances of a pattern, and
//! generalizations of a ground term. Results are candidate supersets; the
//! caller confirms with the real unifier.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use crate::{
	term::{Term, TermKind},
	types::ItemId,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
	Sym(Arc<str>),
	Num(u64),
	Fun(Arc<str>, usize),
	List(usize),
	Var,
}

impl Key {
	/// How many complete subterms follow this key before the position it
	/// opened is closed.
	fn arity(&self) -> usize {
		match self {
			Key::Fun(_, n) | Key::List(n) => *n,
			_ => 0,
		}
	}
}

fn key_of(term: &Term) -> Key {
	match term.kind() {
		TermKind::Symbol(s) => Key::Sym(s.clone()),
		TermKind::Var(_) => Key::Var,
		TermKind::Number(n) => Key::Num(n.to_bits()),
		TermKind::Compound(h, args) => Key::Fun(h.clone(), args.len()),
		TermKind::List(elems) => Key::List(elems.len()),
	}
}

fn flatten(term: &Term, out: &mut Vec<Key>) {
	out.push(key_of(term));
	for a in term.args() {
		flatten(a, out);
	}
}

#[derive(Debug, Default)]
struct Node {
	children: HashMap<Key, Node>,
	/// Ids of all items whose term path passes through this node. Because
	/// flattened paths are self-delimiting, the set at a path's final node
	/// holds exactly the items with that term.
	ids: HashSet<ItemId>,
}

#[derive(Debug, Default)]
pub struct PathIndex {
	root: Node,
	entries: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
	/// Candidates that may unify with the query.
	Unifiable,
	/// Query is a pattern; candidates are at least as specific.
	Instances,
	/// Candidates are patterns covering the (usually ground) query.
	Generalizations,
}

impl PathIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries
	}

	pub fn is_empty(&self) -> bool {
		self.entries == 0
	}

	pub fn insert(&mut self, term: &Term, id: ItemId) {
		let mut keys = Vec::with_capacity(term.weight() as usize);
		flatten(term, &mut keys);
		let mut node = &mut self.root;
		for key in keys {
			node = node.children.entry(key).or_default();
			node.ids.insert(id);
		}
		self.entries += 1;
	}

	pub fn remove(&mut self, term: &Term, id: ItemId) {
		let mut keys = Vec::with_capacity(term.weight() as usize);
		flatten(term, &mut keys);
		if Self::remove_path(&mut self.root, &keys, id) {
			self.entries = self.entries.saturating_sub(1);
		}
	}

	fn remove_path(node: &mut Node, keys: &[Key], id: ItemId) -> bool {
		let key = match keys.first() {
			Some(k) => k,
			None => return true,
		};
		let child = match node.children.get_mut(key) {
			Some(c) => c,
			None => return false,
		};
		if !Self::remove_path(child, &keys[1..], id) {
			return false;
		}
		child.ids.remove(&id);
		if child.ids.is_empty() {
			node.children.remove(key);
		}
		true
	}

	/// Candidate ids for `query` under `mode`, visiting at most `budget`
	/// trie nodes. The budget bounds runaway searches on near-universal
	/// patterns; results are best-effort once it is exhausted.
	pub fn search(&self, query: &Term, mode: SearchMode, budget: usize) -> HashSet<ItemId> {
		let mut out = HashSet::new();
		let mut budget = budget;
		let rest = [query.clone()];
		Self::descend(&self.root, &rest, mode, &mut budget, &mut out);
		out
	}

	fn descend(node: &Node, rest: &[Term], mode: SearchMode, budget: &mut usize, out: &mut HashSet<ItemId>) {
		if *budget == 0 {
			return;
		}
		*budget -= 1;

		let (head, tail) = match rest.split_first() {
			None => {
				out.extend(node.ids.iter().copied());
				return;
			}
			Some(split) => split,
		};

		if head.is_var() {
			match mode {
				// only a candidate variable generalizes an arbitrary query
				// variable position
				SearchMode::Generalizations => {
					if let Some(child) = node.children.get(&Key::Var) {
						Self::descend(child, tail, mode, budget, out);
					}
				}
				// a query variable matches all children
				SearchMode::Unifiable | SearchMode::Instances => {
					Self::skip_subterm(node, 1, &mut |landed| {
						Self::descend(landed, tail, mode, budget, out);
					});
				}
			}
			return;
		}

		// candidate wildcard consumes the entire query subterm
		if mode != SearchMode::Instances {
			if let Some(child) = node.children.get(&Key::Var) {
				Self::descend(child, tail, mode, budget, out);
			}
		}

		// specific child: open the head and queue its arguments
		if let Some(child) = node.children.get(&key_of(head)) {
			let mut next: Vec<Term> = Vec::with_capacity(head.args().len() + tail.len());
			next.extend(head.args().iter().cloned());
			next.extend(tail.iter().cloned());
			Self::descend(child, &next, mode, budget, out);
		}
	}

	/// Visit every node reachable from `node` by consuming exactly
	/// `pending` complete subterms.
	fn skip_subterm(node: &Node, pending: usize, visit: &mut dyn FnMut(&Node)) {
		if pending == 0 {
			visit(node);
			return;
		}
		for (key, child) in &node.children {
			Self::skip_subterm(child, pending - 1 + key.arity(), visit);
		}
	}
}
