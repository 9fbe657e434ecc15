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

//! Primitive actions and their executor.
//!
//! A matched meta contributes `σ(action_term)`; the executor parses that
//! into an [`Action`] and dispatches. Mutations go through the knowledge
//! base's compare-and-set against the freshest view; a lost swap logs a
//! warning and leaves retrying to the scheduler's outer policy.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::{
	bus::Event,
	error::{NoemaError, Result},
	kb::KnowledgeBase,
	oracle::{self, Oracle},
	parse,
	term::Term,
	types::{Confidence, Item, ItemId, Role, Status},
	unify::Subst,
};

pub const META_DEF: &str = "meta_def";
/// Provenance marker for oracle-sourced items.
pub const ORACLE_SOURCE: &str = "ORACLE";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckKind {
	AllDone,
	AllTerminal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
	Noop,
	AddThought { role: Role, content: Term, belief: Confidence },
	SetStatus(Status),
	SetBelief(bool),
	CheckParentCompletion { check: CheckKind, status_if_complete: Status, recursive: bool },
	GenerateThoughts(Term),
	CallOracle { prompt: Term, role: Role },
	Sequence(Vec<Action>),
}

/// The `target` component of a `meta_def(target, action)` content term.
pub fn meta_target(content: &Term) -> Result<&Term> {
	meta_parts(content).map(|(target, _)| target)
}

/// The `action` component of a `meta_def(target, action)` content term.
pub fn meta_action(content: &Term) -> Result<&Term> {
	meta_parts(content).map(|(_, action)| action)
}

fn meta_parts(content: &Term) -> Result<(&Term, &Term)> {
	if content.head() == Some(META_DEF) && content.args().len() == 2 {
		Ok((&content.args()[0], &content.args()[1]))
	} else {
		Err(NoemaError::Action(format!("not a meta_def form: `{}`", content)))
	}
}

fn first_var(term: &Term) -> Option<Arc<str>> {
	term.variables().into_iter().next()
}

fn require_ground(term: &Term) -> Result<()> {
	match first_var(term) {
		Some(var) => Err(NoemaError::UnboundVariable(var.to_string())),
		None => Ok(()),
	}
}

fn parse_role(term: &Term) -> Result<Role> {
	require_ground(term)?;
	term.as_symbol()
		.ok_or_else(|| NoemaError::Action(format!("expected a role symbol, got `{}`", term)))?
		.parse()
		.map_err(NoemaError::Action)
}

fn parse_belief(term: &Term) -> Result<Confidence> {
	require_ground(term)?;
	if let Some(n) = term.as_number() {
		return Ok(Confidence::from_score(n));
	}
	match term.as_symbol() {
		Some("POSITIVE") => Ok(Confidence::from_score(0.9)),
		Some("NEGATIVE") => Ok(Confidence::from_score(0.1)),
		_ => Err(NoemaError::Action(format!("expected a belief score, got `{}`", term))),
	}
}

fn parse_bool(term: &Term) -> Result<bool> {
	match term.as_symbol() {
		Some("true") => Ok(true),
		Some("false") => Ok(false),
		_ => Err(NoemaError::Action(format!("expected true/false, got `{}`", term))),
	}
}

impl Action {
	/// Parse a fully substituted action term. Variables remaining in
	/// ground-required positions fail with `UnboundVariable`; structural
	/// problems fail with `Action`.
	pub fn from_term(term: &Term) -> Result<Action> {
		if let Some(var) = term.as_var() {
			return Err(NoemaError::UnboundVariable(var.to_string()));
		}
		let head = term
			.head()
			.ok_or_else(|| NoemaError::Action(format!("action must be a symbol or compound, got `{}`", term)))?;
		let args = term.args();
		match (head, args.len()) {
			("noop", 0) => Ok(Action::Noop),
			("add_thought", 3) => {
				let role = parse_role(&args[0])?;
				require_ground(&args[1])?;
				let belief = parse_belief(&args[2])?;
				Ok(Action::AddThought { role, content: args[1].clone(), belief })
			}
			("set_status", 1) => {
				let status: Status = args[0]
					.as_symbol()
					.ok_or_else(|| NoemaError::Action(format!("expected a status symbol, got `{}`", args[0])))?
					.parse()
					.map_err(NoemaError::Action)?;
				if status == Status::Active {
					return Err(NoemaError::Action("set_status(ACTIVE) is forbidden".into()));
				}
				Ok(Action::SetStatus(status))
			}
			("set_belief", 1) => match args[0].as_symbol() {
				Some("POSITIVE") => Ok(Action::SetBelief(true)),
				Some("NEGATIVE") => Ok(Action::SetBelief(false)),
				_ => Err(NoemaError::Action(format!("set_belief takes POSITIVE or NEGATIVE, got `{}`", args[0]))),
			},
			("check_parent_completion", 3) => {
				let check = match args[0].as_symbol() {
					Some("ALL_DONE") => CheckKind::AllDone,
					Some("ALL_TERMINAL") => CheckKind::AllTerminal,
					_ => {
						return Err(NoemaError::Action(format!(
							"check_parent_completion takes ALL_DONE or ALL_TERMINAL, got `{}`",
							args[0]
						)))
					}
				};
				let status: Status = args[1]
					.as_symbol()
					.ok_or_else(|| NoemaError::Action(format!("expected a status symbol, got `{}`", args[1])))?
					.parse()
					.map_err(NoemaError::Action)?;
				if status == Status::Active {
					return Err(NoemaError::Action("set_status(ACTIVE) is forbidden".into()));
				}
				Ok(Action::CheckParentCompletion { check, status_if_complete: status, recursive: parse_bool(&args[2])? })
			}
			("generate_thoughts", 1) => {
				require_ground(&args[0])?;
				Ok(Action::GenerateThoughts(args[0].clone()))
			}
			("call_oracle", 2) => {
				require_ground(&args[0])?;
				Ok(Action::CallOracle { prompt: args[0].clone(), role: parse_role(&args[1])? })
			}
			("sequence", _) => {
				let steps = args.iter().map(Action::from_term).collect::<Result<Vec<_>>>()?;
				Ok(Action::Sequence(steps))
			}
			(other, n) => Err(NoemaError::Action(format!("unknown primitive `{}` with arity {}", other, n))),
		}
	}
}

fn prompt_text(prompt: &Term) -> String {
	match prompt.as_symbol() {
		Some(s) => s.to_string(),
		None => prompt.to_string(),
	}
}

pub struct Executor {
	kb: Arc<KnowledgeBase>,
	oracle: Arc<dyn Oracle>,
}

impl Executor {
	pub fn new(kb: Arc<KnowledgeBase>, oracle: Arc<dyn Oracle>) -> Self {
		Self { kb, oracle }
	}

	pub fn kb(&self) -> &Arc<KnowledgeBase> {
		&self.kb
	}

	/// Extract `σ(M.action_term)` from the matched meta and dispatch it
	/// against the active item.
	pub async fn execute(&self, item: &Arc<Item>, meta: &Arc<Item>, bindings: &Subst) -> Result<()> {
		let action_term = bindings.apply(meta_action(&meta.content)?);
		let action = Action::from_term(&action_term)?;
		self.run(item, meta, &action).await
	}

	fn run<'a>(&'a self, item: &'a Arc<Item>, meta: &'a Arc<Item>, action: &'a Action) -> BoxFuture<'a, Result<()>> {
		async move {
			match action {
				Action::Noop => Ok(()),
				Action::AddThought { role, content, belief } => {
					self.add_thought(item.id, meta.id, *role, content.clone(), *belief)
				}
				Action::SetStatus(status) => self.set_status(item.id, *status),
				Action::SetBelief(positive) => self.set_belief(item.id, *positive),
				Action::CheckParentCompletion { check, status_if_complete, recursive } => {
					self.check_parent_completion(item, *check, *status_if_complete, *recursive)
				}
				Action::GenerateThoughts(prompt) => self.generate_thoughts(item, meta, prompt).await,
				Action::CallOracle { prompt, role } => self.call_oracle(item, meta, prompt, *role).await,
				Action::Sequence(steps) => {
					for (i, step) in steps.iter().enumerate() {
						self.run(item, meta, step)
							.await
							.map_err(|e| NoemaError::Action(format!("sequence failed at step {}: {}", i, e)))?;
					}
					Ok(())
				}
			}
		}
		.boxed()
	}

	fn add_thought(&self, parent: ItemId, meta: ItemId, role: Role, content: Term, belief: Confidence) -> Result<()> {
		let item = Item::new(role, content, belief).with_parent(parent).with_provenance(vec![meta.to_string()]);
		if self.kb.add(item).is_none() {
			log::debug!("add_thought produced trivial content; skipped");
		}
		Ok(())
	}

	fn set_status(&self, id: ItemId, status: Status) -> Result<()> {
		let current = self.kb.get(id).ok_or_else(|| NoemaError::Action(format!("item {} is gone", id)))?;
		let mut next = (*current).clone();
		next.status = status;
		if !self.kb.update(&current, next) {
			log::warn!("set_status({}) lost the swap on {}; scheduler will retry", status, id);
		}
		Ok(())
	}

	fn set_belief(&self, id: ItemId, positive: bool) -> Result<()> {
		let current = self.kb.get(id).ok_or_else(|| NoemaError::Action(format!("item {} is gone", id)))?;
		let mut next = (*current).clone();
		next.belief = next.belief.update(positive);
		if !self.kb.update(&current, next) {
			log::warn!("set_belief lost the swap on {}; scheduler will retry", id);
		}
		Ok(())
	}

	fn check_parent_completion(
		&self,
		item: &Arc<Item>,
		check: CheckKind,
		status_if_complete: Status,
		recursive: bool,
	) -> Result<()> {
		let mut parent_id = item
			.parent_id()
			.ok_or_else(|| NoemaError::Action(format!("item {} has no parent to complete", item.id)))?;

		loop {
			let parent = match self.kb.get(parent_id) {
				Some(p) => p,
				None => return Ok(()),
			};
			// a second check after completion is a no-op
			if parent.status != Status::WaitingChildren {
				return Ok(());
			}
			let children = self.kb.children_of(parent.id);
			let complete = match check {
				CheckKind::AllDone => children.iter().all(|c| c.status == Status::Done),
				CheckKind::AllTerminal => children.iter().all(|c| c.is_terminal()),
			};
			if !complete {
				return Ok(());
			}

			let mut next = (*parent).clone();
			next.status = status_if_complete;
			if !self.kb.update(&parent, next) {
				log::warn!("parent completion lost the swap on {}; scheduler will retry", parent.id);
				return Ok(());
			}

			match parent.parent_id() {
				Some(grandparent) if recursive => parent_id = grandparent,
				_ => return Ok(()),
			}
		}
	}

	async fn generate_thoughts(&self, item: &Arc<Item>, meta: &Arc<Item>, prompt: &Term) -> Result<()> {
		let text = oracle::generate(self.oracle.clone(), prompt_text(prompt)).await?;
		self.kb.bus().publish(Event::OracleResponse { source: item.id, text: text.clone() });

		for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
			// malformed oracle output is logged and skipped; it never fails
			// the action
			let parsed = match parse::parse_term(line).map(|t| Action::from_term(&t)) {
				Ok(Ok(Action::AddThought { role, content, belief })) => Some((role, content, belief)),
				_ => None,
			};
			match parsed {
				Some((role, content, belief)) => {
					let child = Item::new(role, content, belief)
						.with_parent(item.id)
						.with_provenance(vec![meta.id.to_string(), ORACLE_SOURCE.into()]);
					self.kb.add(child);
				}
				None => log::warn!("skipping malformed oracle line: {}", line),
			}
		}
		Ok(())
	}

	async fn call_oracle(&self, item: &Arc<Item>, meta: &Arc<Item>, prompt: &Term, role: Role) -> Result<()> {
		let text = oracle::generate(self.oracle.clone(), prompt_text(prompt)).await?;
		self.kb.bus().publish(Event::OracleResponse { source: item.id, text: text.clone() });

		let content = parse::term_or_note(&text);
		let child = Item::new(role, content, Confidence::default())
			.with_parent(item.id)
			.with_provenance(vec![meta.id.to_string(), ORACLE_SOURCE.into()]);
		self.kb.add(child);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		bus::EventBus,
		kb::KbConfig,
		oracle::MockOracle,
		parse::parse_term,
		unify::match_pattern,
	};

	fn t(src: &str) -> Term {
		parse_term(src).unwrap()
	}

	fn setup() -> (Arc<KnowledgeBase>, Arc<MockOracle>, Executor) {
		let kb = Arc::new(KnowledgeBase::new(KbConfig::default(), EventBus::new()));
		let oracle = Arc::new(MockOracle::new());
		let executor = Executor::new(kb.clone(), oracle.clone());
		(kb, oracle, executor)
	}

	fn add(kb: &KnowledgeBase, role: Role, src: &str) -> Arc<Item> {
		kb.add(Item::new(role, t(src), Confidence::default())).unwrap()
	}

	fn meta(kb: &KnowledgeBase, src: &str) -> Arc<Item> {
		add(kb, Role::Meta, src)
	}

	#[test]
	fn parses_primitives() {
		assert_eq!(Action::from_term(&t("noop")).unwrap(), Action::Noop);
		assert_eq!(Action::from_term(&t("(set_status DONE)")).unwrap(), Action::SetStatus(Status::Done));
		assert!(matches!(
			Action::from_term(&t("(add_thought STRATEGY (pack bags) 0.8)")).unwrap(),
			Action::AddThought { role: Role::Strategy, .. }
		));
		assert!(matches!(
			Action::from_term(&t("(sequence noop (set_belief POSITIVE))")).unwrap(),
			Action::Sequence(ref steps) if steps.len() == 2
		));
	}

	#[test]
	fn rejects_structural_errors() {
		assert!(matches!(Action::from_term(&t("(set_status ACTIVE)")), Err(NoemaError::Action(_))));
		assert!(matches!(Action::from_term(&t("(set_status DONE extra)")), Err(NoemaError::Action(_))));
		assert!(matches!(Action::from_term(&t("(frobnicate a)")), Err(NoemaError::Action(_))));
		assert!(matches!(Action::from_term(&t("(set_belief MAYBE)")), Err(NoemaError::Action(_))));
	}

	#[test]
	fn rejects_unbound_variables() {
		match Action::from_term(&t("(add_thought STRATEGY (pack ?what) 0.8)")) {
			Err(NoemaError::UnboundVariable(v)) => assert_eq!(v, "what"),
			other => panic!("expected UnboundVariable, got {:?}", other),
		}
		assert!(matches!(Action::from_term(&t("?a")), Err(NoemaError::UnboundVariable(_))));
	}

	#[test]
	fn execute_applies_bindings_from_meta() {
		let (kb, _oracle, executor) = setup();
		let goal = add(&kb, Role::Goal, "(plan trip)");
		let m = meta(&kb, "(meta_def (plan ?w) (add_thought STRATEGY (research ?w) 0.7))");
		let bindings = match_pattern(meta_target(&m.content).unwrap(), &goal.content).unwrap();

		smol::block_on(executor.execute(&goal, &m, &bindings)).unwrap();

		let children = kb.children_of(goal.id);
		assert_eq!(children.len(), 1);
		assert_eq!(children[0].content, t("(research trip)"));
		assert_eq!(children[0].provenance(), [m.id.to_string()]);
	}

	#[test]
	fn sequence_failure_names_the_step() {
		let (kb, _oracle, executor) = setup();
		let goal = add(&kb, Role::Goal, "(g a)");
		let m = meta(&kb, "(meta_def (g ?x) (sequence noop (set_status ACTIVE) noop))");
		let bindings = match_pattern(meta_target(&m.content).unwrap(), &goal.content).unwrap();

		// set_status(ACTIVE) is rejected at parse, before any step runs
		let err = smol::block_on(executor.execute(&goal, &m, &bindings)).unwrap_err();
		assert!(matches!(err, NoemaError::Action(_)));

		let m2 = meta(&kb, "(meta_def (g ?x) (sequence noop (check_parent_completion ALL_DONE DONE false)))");
		let bindings = match_pattern(meta_target(&m2.content).unwrap(), &goal.content).unwrap();
		let err = smol::block_on(executor.execute(&goal, &m2, &bindings)).unwrap_err();
		match err {
			NoemaError::Action(msg) => assert!(msg.contains("step 1"), "got: {}", msg),
			other => panic!("expected Action, got {:?}", other),
		}
	}

	#[test]
	fn parent_completion_is_idempotent() {
		let (kb, _oracle, executor) = setup();
		let parent = add(&kb, Role::Goal, "(goal g)");
		let mut waiting = (*parent).clone();
		waiting.status = Status::WaitingChildren;
		assert!(kb.update(&parent, waiting));

		let c1 = kb
			.add(Item::new(Role::Strategy, t("(step one)"), Confidence::default()).with_parent(parent.id))
			.unwrap();
		let _c2 = kb
			.add(Item::new(Role::Strategy, t("(step two)"), Confidence::default())
				.with_parent(parent.id)
				.with_status(Status::Done))
			.unwrap();

		let m = meta(&kb, "(meta_def ?t (check_parent_completion ALL_DONE DONE false))");
		let bindings = Subst::new();

		// one child still pending: no transition
		smol::block_on(executor.execute(&c1, &m, &bindings)).unwrap();
		assert_eq!(kb.get(parent.id).unwrap().status, Status::WaitingChildren);

		let c1_now = kb.get(c1.id).unwrap();
		let mut done = (*c1_now).clone();
		done.status = Status::Done;
		assert!(kb.update(&c1_now, done));

		smol::block_on(executor.execute(&c1, &m, &bindings)).unwrap();
		assert_eq!(kb.get(parent.id).unwrap().status, Status::Done);

		// second check is a no-op
		smol::block_on(executor.execute(&c1, &m, &bindings)).unwrap();
		assert_eq!(kb.get(parent.id).unwrap().status, Status::Done);
	}

	#[test]
	fn generate_thoughts_commits_wellformed_lines() {
		let (kb, oracle, executor) = setup();
		let goal = add(&kb, Role::Goal, "(decompose plan_weekend_trip)");
		let m = meta(&kb, "(meta_def (decompose ?g) (generate_thoughts ?g))");
		oracle.enqueue(
			"(add_thought STRATEGY (book hotel) 0.8)\nthis line is noise\n(add_thought STRATEGY (pack bags) 0.6)",
		);
		let bindings = match_pattern(meta_target(&m.content).unwrap(), &goal.content).unwrap();

		smol::block_on(executor.execute(&goal, &m, &bindings)).unwrap();

		let children = kb.children_of(goal.id);
		assert_eq!(children.len(), 2);
		for child in &children {
			assert_eq!(child.role, Role::Strategy);
			assert_eq!(child.parent_id(), Some(goal.id));
			assert_eq!(child.provenance(), [m.id.to_string(), ORACLE_SOURCE.to_string()]);
		}
		assert_eq!(oracle.prompts(), vec!["plan_weekend_trip"]);
	}

	#[test]
	fn call_oracle_wraps_unparsable_responses() {
		let (kb, oracle, executor) = setup();
		let goal = add(&kb, Role::Goal, "(ask question)");
		let m = meta(&kb, "(meta_def (ask ?q) (call_oracle ?q OUTCOME))");
		oracle.enqueue("not ((( a term");
		let bindings = match_pattern(meta_target(&m.content).unwrap(), &goal.content).unwrap();

		smol::block_on(executor.execute(&goal, &m, &bindings)).unwrap();

		let children = kb.children_of(goal.id);
		assert_eq!(children.len(), 1);
		assert_eq!(children[0].role, Role::Outcome);
		assert_eq!(children[0].content.as_symbol(), Some("not ((( a term"));
	}
}
