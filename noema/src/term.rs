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

//! The immutable term algebra.
//!
//! A [`Term`] is a cheaply clonable handle over a structurally hashed node.
//! Two terms are equal iff their structural hashes and shapes are equal; the
//! hash is computed once at construction so equality and map lookups stay
//! cheap on deep terms. All containers are immutable; every "update"
//! elsewhere in the engine builds new terms.

use std::{
	fmt,
	hash::{Hash, Hasher},
	sync::Arc,
};

use hashbrown::HashSet;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Reserved head under which lists print and parse.
pub const LIST_HEAD: &str = "list";

static SYMBOLS: Lazy<Mutex<HashSet<Arc<str>>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Intern a symbol or variable name. Names are shared process-wide so that
/// repeated parses of the same predicate do not reallocate.
pub fn intern(name: &str) -> Arc<str> {
	let mut table = SYMBOLS.lock();
	if let Some(existing) = table.get(name) {
		return existing.clone();
	}
	let fresh: Arc<str> = Arc::from(name);
	table.insert(fresh.clone());
	fresh
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "TermRepr", into = "TermRepr")]
pub struct Term(Arc<TermData>);

struct TermData {
	kind: TermKind,
	hash: u64,
	weight: u32,
	ground: bool,
}

#[derive(Clone)]
pub enum TermKind {
	Symbol(Arc<str>),
	Var(Arc<str>),
	Number(f64),
	Compound(Arc<str>, Vec<Term>),
	List(Vec<Term>),
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv_str(tag: u8, s: &str) -> u64 {
	let mut h = FNV_OFFSET ^ u64::from(tag);
	for b in s.as_bytes() {
		h ^= u64::from(*b);
		h = h.wrapping_mul(FNV_PRIME);
	}
	h
}

fn fnv_parts(tag: u8, seed: u64, parts: &[Term]) -> u64 {
	let mut h = (FNV_OFFSET ^ u64::from(tag)).wrapping_mul(FNV_PRIME) ^ seed;
	for p in parts {
		h ^= p.id();
		h = h.wrapping_mul(FNV_PRIME);
	}
	h
}

impl Term {
	pub fn symbol<S: AsRef<str>>(name: S) -> Term {
		let name = intern(name.as_ref());
		let hash = fnv_str(1, &name);
		Term(Arc::new(TermData { kind: TermKind::Symbol(name), hash, weight: 1, ground: true }))
	}

	/// A variable. `name` is stored without the surface `?` prefix.
	pub fn var<S: AsRef<str>>(name: S) -> Term {
		let name = intern(name.as_ref());
		let hash = fnv_str(2, &name);
		Term(Arc::new(TermData { kind: TermKind::Var(name), hash, weight: 1, ground: false }))
	}

	pub fn number(n: f64) -> Term {
		let hash = fnv_str(3, "").wrapping_add(n.to_bits());
		Term(Arc::new(TermData { kind: TermKind::Number(n), hash, weight: 1, ground: true }))
	}

	/// A compound `(head args…)`. The reserved head `list` builds a [`TermKind::List`],
	/// keeping the list/compound distinction canonical no matter which
	/// constructor a caller reaches for.
	pub fn compound<S: AsRef<str>>(head: S, args: Vec<Term>) -> Term {
		if head.as_ref() == LIST_HEAD {
			return Term::list(args);
		}
		let head = intern(head.as_ref());
		let hash = fnv_parts(4, fnv_str(1, &head), &args);
		let weight = 1 + args.iter().map(Term::weight).sum::<u32>();
		let ground = args.iter().all(Term::is_ground);
		Term(Arc::new(TermData { kind: TermKind::Compound(head, args), hash, weight, ground }))
	}

	pub fn list(elems: Vec<Term>) -> Term {
		let hash = fnv_parts(5, 0, &elems);
		let weight = 1 + elems.iter().map(Term::weight).sum::<u32>();
		let ground = elems.iter().all(Term::is_ground);
		Term(Arc::new(TermData { kind: TermKind::List(elems), hash, weight, ground }))
	}

	pub fn kind(&self) -> &TermKind {
		&self.0.kind
	}

	/// The cached structural identity hash.
	pub fn id(&self) -> u64 {
		self.0.hash
	}

	/// Node count, used as the size measure for rewrite orientation and
	/// derivation caps.
	pub fn weight(&self) -> u32 {
		self.0.weight
	}

	pub fn is_ground(&self) -> bool {
		self.0.ground
	}

	pub fn is_var(&self) -> bool {
		matches!(self.0.kind, TermKind::Var(_))
	}

	pub fn as_symbol(&self) -> Option<&str> {
		match &self.0.kind {
			TermKind::Symbol(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_var(&self) -> Option<&Arc<str>> {
		match &self.0.kind {
			TermKind::Var(v) => Some(v),
			_ => None,
		}
	}

	pub fn as_number(&self) -> Option<f64> {
		match &self.0.kind {
			TermKind::Number(n) => Some(*n),
			_ => None,
		}
	}

	/// The functor of a compound, the symbol name of a bare symbol, or the
	/// reserved list head. Numbers and variables have no head.
	pub fn head(&self) -> Option<&str> {
		match &self.0.kind {
			TermKind::Symbol(s) => Some(s),
			TermKind::Compound(h, _) => Some(h),
			TermKind::List(_) => Some(LIST_HEAD),
			_ => None,
		}
	}

	pub fn args(&self) -> &[Term] {
		match &self.0.kind {
			TermKind::Compound(_, args) => args,
			TermKind::List(elems) => elems,
			_ => &[],
		}
	}

	/// Collect the names of all variables occurring in the term.
	pub fn variables(&self) -> HashSet<Arc<str>> {
		let mut out = HashSet::new();
		self.collect_variables(&mut out);
		out
	}

	fn collect_variables(&self, out: &mut HashSet<Arc<str>>) {
		match &self.0.kind {
			TermKind::Var(v) => {
				out.insert(v.clone());
			}
			TermKind::Compound(_, args) | TermKind::List(args) => {
				for a in args {
					a.collect_variables(out);
				}
			}
			_ => {}
		}
	}

	/// Preorder iteration over the term and all of its subterms.
	pub fn subterms(&self) -> Vec<Term> {
		let mut out = Vec::with_capacity(self.weight() as usize);
		let mut stack = vec![self.clone()];
		while let Some(t) = stack.pop() {
			for a in t.args() {
				stack.push(a.clone());
			}
			out.push(t);
		}
		out
	}
}

impl PartialEq for Term {
	fn eq(&self, other: &Term) -> bool {
		if Arc::ptr_eq(&self.0, &other.0) {
			return true;
		}
		if self.0.hash != other.0.hash {
			return false;
		}
		match (&self.0.kind, &other.0.kind) {
			(TermKind::Symbol(a), TermKind::Symbol(b)) => a == b,
			(TermKind::Var(a), TermKind::Var(b)) => a == b,
			(TermKind::Number(a), TermKind::Number(b)) => a.to_bits() == b.to_bits(),
			(TermKind::Compound(h1, a1), TermKind::Compound(h2, a2)) => h1 == h2 && a1 == a2,
			(TermKind::List(a1), TermKind::List(a2)) => a1 == a2,
			_ => false,
		}
	}
}

impl Eq for Term {}

impl Hash for Term {
	fn hash<H: Hasher>(&self, state: &mut H) {
		state.write_u64(self.0.hash);
	}
}

fn symbol_needs_quoting(s: &str) -> bool {
	s.is_empty()
		|| s.parse::<f64>().is_ok()
		|| s.starts_with('?')
		|| s.starts_with('$')
		|| s.chars().any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';'))
}

impl fmt::Display for Term {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.0.kind {
			TermKind::Symbol(s) => {
				if symbol_needs_quoting(s) {
					write!(f, "\"")?;
					for c in s.chars() {
						match c {
							'"' => write!(f, "\\\"")?,
							'\\' => write!(f, "\\\\")?,
							'\n' => write!(f, "\\n")?,
							c => write!(f, "{}", c)?,
						}
					}
					write!(f, "\"")
				} else {
					write!(f, "{}", s)
				}
			}
			TermKind::Var(v) => write!(f, "?{}", v),
			TermKind::Number(n) => write!(f, "{}", n),
			TermKind::Compound(h, args) => {
				write!(f, "({}", h)?;
				for a in args {
					write!(f, " {}", a)?;
				}
				write!(f, ")")
			}
			TermKind::List(elems) => {
				write!(f, "({}", LIST_HEAD)?;
				for e in elems {
					write!(f, " {}", e)?;
				}
				write!(f, ")")
			}
		}
	}
}

impl fmt::Debug for Term {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

/// Persisted mirror of [`Term`]; hashes are rebuilt on the way back in.
#[derive(Clone, Serialize, Deserialize)]
enum TermRepr {
	Sym(String),
	Var(String),
	Num(f64),
	App(String, Vec<TermRepr>),
	List(Vec<TermRepr>),
}

impl From<TermRepr> for Term {
	fn from(repr: TermRepr) -> Term {
		match repr {
			TermRepr::Sym(s) => Term::symbol(s),
			TermRepr::Var(v) => Term::var(v),
			TermRepr::Num(n) => Term::number(n),
			TermRepr::App(h, args) => Term::compound(h, args.into_iter().map(Term::from).collect()),
			TermRepr::List(elems) => Term::list(elems.into_iter().map(Term::from).collect()),
		}
	}
}

impl From<Term> for TermRepr {
	fn from(term: Term) -> TermRepr {
		match term.kind() {
			TermKind::Symbol(s) => TermRepr::Sym(s.to_string()),
			TermKind::Var(v) => TermRepr::Var(v.to_string()),
			TermKind::Number(n) => TermRepr::Num(*n),
			TermKind::Compound(h, args) => {
				TermRepr::App(h.to_string(), args.iter().cloned().map(TermRepr::from).collect())
			}
			TermKind::List(elems) => TermRepr::List(elems.iter().cloned().map(TermRepr::from).collect()),
		}
	}
}
