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

//! The select–activate–match–execute cycle and the worker actor that runs
//! it.
//!
//! One cycle: sample a PENDING non-META item, claim it with a CAS to
//! ACTIVE, pick a matching meta by confidence weight, and run its action
//! under the cycle timeout. The action is responsible for moving the item
//! out of ACTIVE; anything else (no meta, error, timeout, an action that
//! forgot) goes down the retry path, reinforcing belief negatively until
//! `max_retries` is exhausted and the item FAILs.

use std::{sync::Arc, time::Duration};

use async_std::future::timeout;
use xtra::prelude::*;

use crate::{
	actions::{meta_target, Executor},
	kb::{weighted_choice, KnowledgeBase},
	types::{Die, Item, ItemId, MetaValue, Status},
	unify::{unify, Subst},
};

/// Exact `error_info` recorded when no meta matches an item.
pub const NO_MATCHING_META: &str = "No matching META";

#[derive(Clone, Copy, Debug)]
pub struct CycleControl {
	pub max_active_duration: Duration,
	pub max_retries: u32,
}

impl Default for CycleControl {
	fn default() -> Self {
		Self { max_active_duration: Duration::from_secs(30), max_retries: 3 }
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
	/// A cycle ran to resolution (including the failure path).
	Worked(ItemId),
	/// Another worker claimed the sampled item first.
	Contended,
	/// Nothing is pending.
	Idle,
}

/// Pick one matching meta by confidence weight.
fn select_meta(kb: &KnowledgeBase, item: &Arc<Item>) -> Option<(Arc<Item>, Subst)> {
	let candidates: Vec<((Arc<Item>, Subst), f64)> = kb
		.active_metas()
		.into_iter()
		.filter(|meta| meta.target_role().map_or(true, |role| role == item.role))
		.filter_map(|meta| {
			let target = meta_target(&meta.content).ok()?;
			let bindings = unify(target, &item.content)?;
			let weight = meta.belief.score();
			Some(((meta, bindings), weight))
		})
		.collect();
	weighted_choice(&candidates).cloned()
}

/// Run one scheduler cycle to resolution.
pub async fn run_cycle(executor: &Executor, control: &CycleControl) -> CycleOutcome {
	let kb = executor.kb().clone();

	let sampled = match kb.sample_pending() {
		Some(item) => item,
		None => return CycleOutcome::Idle,
	};

	// claim: PENDING → ACTIVE; losing means another worker got there first
	let mut claim = (*sampled).clone();
	claim.status = Status::Active;
	if !kb.update(&sampled, claim) {
		return CycleOutcome::Contended;
	}
	let item = match kb.get(sampled.id) {
		Some(item) => item,
		None => return CycleOutcome::Contended,
	};

	match select_meta(&kb, &item) {
		None => fail_cycle(&kb, item.id, NO_MATCHING_META, control),
		Some((meta, bindings)) => {
			log::debug!("cycle: {} matched meta {}", item.id, meta.id);
			match timeout(control.max_active_duration, executor.execute(&item, &meta, &bindings)).await {
				Err(_) => fail_cycle(
					&kb,
					item.id,
					&format!("cycle timed out after {:?}", control.max_active_duration),
					control,
				),
				Ok(Err(e)) => fail_cycle(&kb, item.id, &e.to_string(), control),
				Ok(Ok(())) => {
					// the action owns the transition out of ACTIVE
					if kb.get(item.id).map_or(false, |i| i.status == Status::Active) {
						fail_cycle(&kb, item.id, "action left item ACTIVE", control);
					}
				}
			}
		}
	}

	CycleOutcome::Worked(item.id)
}

/// Apply the retry policy: bump `retry_count`, reinforce belief negatively
/// and requeue, or FAIL once retries are spent.
fn fail_cycle(kb: &KnowledgeBase, id: ItemId, error: &str, control: &CycleControl) {
	for _ in 0..8 {
		let current = match kb.get(id) {
			Some(c) => c,
			None => return,
		};
		let retries = current.retry_count() + 1;
		let mut next = (*current).clone();
		next.belief = next.belief.update(false);
		next.metadata.insert(crate::types::meta_keys::RETRY_COUNT.into(), MetaValue::Num(f64::from(retries)));
		next.metadata.insert(crate::types::meta_keys::ERROR_INFO.into(), MetaValue::Str(error.to_string()));
		next.status = if retries <= control.max_retries { Status::Pending } else { Status::Failed };
		if kb.update(&current, next) {
			log::debug!("cycle failure on {} (attempt {}): {}", id, retries, error);
			return;
		}
	}
	log::warn!("could not record cycle failure on {}: persistent contention", id);
}

/// Worker actor: drains pending cycles on a short tick.
pub struct CycleWorker {
	executor: Arc<Executor>,
	control: CycleControl,
	poll_interval: Duration,
	/// cycles run per tick before yielding the mailbox
	batch: usize,
}

impl CycleWorker {
	pub fn new(executor: Arc<Executor>, control: CycleControl, poll_interval: Duration) -> Self {
		Self { executor, control, poll_interval, batch: 32 }
	}
}

#[async_trait::async_trait]
impl Actor for CycleWorker {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		ctx.notify_interval(self.poll_interval, || Tick);
	}
}

pub struct Tick;

impl Message for Tick {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Tick> for CycleWorker {
	async fn handle(&mut self, _: Tick, _: &mut Context<Self>) {
		for _ in 0..self.batch {
			match run_cycle(&self.executor, &self.control).await {
				CycleOutcome::Worked(_) => continue,
				CycleOutcome::Contended | CycleOutcome::Idle => break,
			}
		}
	}
}

#[async_trait::async_trait]
impl Handler<Die> for CycleWorker {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
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
		types::{Confidence, Role},
	};

	fn setup() -> (Arc<KnowledgeBase>, Arc<MockOracle>, Executor) {
		let kb = Arc::new(KnowledgeBase::new(KbConfig::default(), EventBus::new()));
		let oracle = Arc::new(MockOracle::new());
		let executor = Executor::new(kb.clone(), oracle.clone());
		(kb, oracle, executor)
	}

	fn add(kb: &KnowledgeBase, role: Role, src: &str) -> Arc<Item> {
		kb.add(Item::new(role, parse_term(src).unwrap(), Confidence::default())).unwrap()
	}

	fn control() -> CycleControl {
		CycleControl { max_active_duration: Duration::from_secs(5), max_retries: 3 }
	}

	#[test]
	fn idle_when_nothing_pending() {
		let (_kb, _oracle, executor) = setup();
		assert_eq!(smol::block_on(run_cycle(&executor, &control())), CycleOutcome::Idle);
	}

	#[test]
	fn matched_meta_resolves_the_item() {
		let (kb, _oracle, executor) = setup();
		add(&kb, Role::Meta, "(meta_def (greet ?w) (sequence (add_thought NOTE (greeted ?w) 0.9) (set_status DONE)))");
		let goal = add(&kb, Role::Goal, "(greet world)");

		let outcome = smol::block_on(run_cycle(&executor, &control()));
		assert_eq!(outcome, CycleOutcome::Worked(goal.id));
		assert_eq!(kb.get(goal.id).unwrap().status, Status::Done);
		assert!(kb.children_of(goal.id).iter().any(|c| c.content == parse_term("(greeted world)").unwrap()));
	}

	#[test]
	fn no_matching_meta_retries_then_fails() {
		let (kb, _oracle, executor) = setup();
		let goal = add(&kb, Role::Goal, "(goal_with_no_meta do_nothing)");
		let control = control();
		let before = kb.get(goal.id).unwrap().belief.score();

		// max_retries + 1 attempts in total
		for attempt in 1..=control.max_retries {
			assert_eq!(smol::block_on(run_cycle(&executor, &control)), CycleOutcome::Worked(goal.id));
			let current = kb.get(goal.id).unwrap();
			assert_eq!(current.status, Status::Pending);
			assert_eq!(current.retry_count(), attempt);
			assert_eq!(current.error_info(), Some(NO_MATCHING_META));
		}
		assert_eq!(smol::block_on(run_cycle(&executor, &control)), CycleOutcome::Worked(goal.id));
		let current = kb.get(goal.id).unwrap();
		assert_eq!(current.status, Status::Failed);
		assert_eq!(current.retry_count(), control.max_retries + 1);
		assert_eq!(current.error_info(), Some(NO_MATCHING_META));
		assert!(current.belief.score() < before);

		// failed items leave the pending pool
		assert_eq!(smol::block_on(run_cycle(&executor, &control)), CycleOutcome::Idle);
	}

	#[test]
	fn action_that_forgets_to_transition_is_a_failure() {
		let (kb, _oracle, executor) = setup();
		add(&kb, Role::Meta, "(meta_def (lazy ?x) noop)");
		let goal = add(&kb, Role::Goal, "(lazy one)");

		smol::block_on(run_cycle(&executor, &control()));
		let current = kb.get(goal.id).unwrap();
		assert_eq!(current.status, Status::Pending);
		assert_eq!(current.error_info(), Some("action left item ACTIVE"));
	}

	#[test]
	fn target_role_restricts_applicability() {
		let (kb, _oracle, executor) = setup();
		kb.add(
			Item::new(Role::Meta, parse_term("(meta_def ?t (set_status DONE))").unwrap(), Confidence::default())
				.with_meta(crate::types::meta_keys::TARGET_ROLE, MetaValue::Str("STRATEGY".into())),
		)
		.unwrap();
		let goal = add(&kb, Role::Goal, "(misc item)");

		smol::block_on(run_cycle(&executor, &control()));
		// role-restricted meta does not fire for a GOAL
		assert_eq!(kb.get(goal.id).unwrap().error_info(), Some(NO_MATCHING_META));
	}

	#[test]
	fn oracle_meta_runs_under_timeout() {
		let (kb, oracle, executor) = setup();
		add(
			&kb,
			Role::Meta,
			"(meta_def (decompose ?g) (sequence (set_status WAITING_CHILDREN) (generate_thoughts ?g)))",
		);
		let goal = add(&kb, Role::Goal, "(decompose plan_weekend_trip)");
		oracle.enqueue("(add_thought STRATEGY (book transport) 0.8)\n(add_thought STRATEGY (reserve lodging) 0.7)");

		smol::block_on(run_cycle(&executor, &control()));

		assert_eq!(kb.get(goal.id).unwrap().status, Status::WaitingChildren);
		let children = kb.children_of(goal.id);
		assert_eq!(children.len(), 2);
		assert!(children.iter().all(|c| c.role == Role::Strategy && c.parent_id() == Some(goal.id)));
	}
}
