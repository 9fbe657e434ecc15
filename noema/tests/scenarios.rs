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

//! End-to-end scenarios over the reasoning core: injection, scheduling,
//! derivation, forgetting and persistence.

use std::{
	sync::{Arc, Once},
	time::{Duration, Instant},
};

use parking_lot::RwLock;

use noema::{
	actions::Executor,
	bus::{Event, EventBus},
	chain::{ChainConfig, Deriver},
	kb::{KbConfig, KnowledgeBase},
	oracle::MockOracle,
	parse::parse_term,
	persist,
	rules::RuleStore,
	run_cycle,
	term::Term,
	types::{Confidence, Item, ItemId, Role, Status},
	CycleControl, CycleOutcome, NO_MATCHING_META,
};

static INIT: Once = Once::new();

/// Guard that should be called at the beginning of every test.
fn initialize() {
	INIT.call_once(|| {
		let _ = pretty_env_logger::try_init();
	});
}

fn t(src: &str) -> Term {
	parse_term(src).unwrap()
}

/// A deterministic, single-threaded stand-in for the running system: the
/// derivation listener is drained by hand after every mutation.
struct Harness {
	kb: Arc<KnowledgeBase>,
	oracle: Arc<MockOracle>,
	executor: Executor,
	deriver: Deriver,
	events: flume::Receiver<Event>,
	control: CycleControl,
}

impl Harness {
	fn new() -> Self {
		Self::with_kb_config(KbConfig::default())
	}

	fn with_kb_config(config: KbConfig) -> Self {
		let bus = EventBus::new();
		let events = bus.subscribe();
		let kb = Arc::new(KnowledgeBase::new(config, bus));
		let rules = Arc::new(RwLock::new(RuleStore::new()));
		let deriver = Deriver::new(kb.clone(), rules, ChainConfig::default());
		let oracle = Arc::new(MockOracle::new());
		let executor = Executor::new(kb.clone(), oracle.clone());
		let control = CycleControl { max_active_duration: Duration::from_secs(5), max_retries: 3 };
		Self { kb, oracle, executor, deriver, events, control }
	}

	fn inject(&self, role: Role, src: &str) -> Arc<Item> {
		let item = self.kb.add(Item::new(role, t(src), Confidence::default())).unwrap();
		self.deriver.drain(&self.events);
		item
	}

	fn cycle(&self) -> CycleOutcome {
		let outcome = smol::block_on(run_cycle(&self.executor, &self.control));
		self.deriver.drain(&self.events);
		outcome
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

// S1: Peano addition normalizes through the oriented-equality rewriter.
#[test]
fn s1_peano_sum() {
	initialize();
	let h = Harness::new();
	h.inject(Role::Note, "(= (add Z ?n) ?n)");
	h.inject(Role::Note, "(= (add (S ?m) ?n) (S (add ?m ?n)))");
	h.inject(Role::Note, "(add (S (S Z)) (S Z))");

	assert_eq!(h.count("(S (S (S Z)))"), 1);
}

// S2: the decompose meta parks the goal and commits oracle strategies as
// its children.
#[test]
fn s2_decomposition_via_meta() {
	initialize();
	let h = Harness::new();
	h.inject(
		Role::Meta,
		"(meta_def (decompose ?g) (sequence (set_status WAITING_CHILDREN) (generate_thoughts ?g)))",
	);
	let goal = h.inject(Role::Goal, "(decompose plan_weekend_trip)");
	h.oracle.enqueue(
		"(add_thought STRATEGY (book transport) 0.8)\n(add_thought STRATEGY (reserve lodging) 0.7)",
	);

	assert_eq!(h.cycle(), CycleOutcome::Worked(goal.id));

	assert_eq!(h.kb.get(goal.id).unwrap().status, Status::WaitingChildren);
	assert_eq!(h.oracle.prompts(), vec!["plan_weekend_trip"]);

	let children = h.kb.children_of(goal.id);
	assert_eq!(children.len(), 2);
	for child in &children {
		assert_eq!(child.role, Role::Strategy);
		assert_eq!(child.parent_id(), Some(goal.id));
		assert!(child.provenance().contains(&"ORACLE".to_string()));
	}
}

// S3: two strategy children complete; the waiting parent transitions DONE
// exactly once, and a later check is a no-op.
#[test]
fn s3_parent_completion() {
	initialize();
	let h = Harness::new();
	h.inject(
		Role::Meta,
		"(meta_def (strategy ?s) (sequence (set_status DONE) (check_parent_completion ALL_DONE DONE false)))",
	);

	let parent = h.inject(Role::Goal, "(goal plan)");
	let mut waiting = (*parent).clone();
	waiting.status = Status::WaitingChildren;
	assert!(h.kb.update(&parent, waiting));

	for name in &["(strategy one)", "(strategy two)"] {
		h.kb.add(Item::new(Role::Strategy, t(name), Confidence::default()).with_parent(parent.id)).unwrap();
	}
	h.deriver.drain(&h.events);

	let transitions = h.kb.bus().subscribe();

	// two pending strategies, two cycles
	assert!(matches!(h.cycle(), CycleOutcome::Worked(_)));
	assert_eq!(h.kb.get(parent.id).unwrap().status, Status::WaitingChildren);
	assert!(matches!(h.cycle(), CycleOutcome::Worked(_)));
	assert_eq!(h.kb.get(parent.id).unwrap().status, Status::Done);
	assert_eq!(h.cycle(), CycleOutcome::Idle);

	let parent_done_transitions = transitions
		.drain()
		.filter(|e| {
			matches!(e, Event::StatusChanged { item, .. } if item.id == parent.id && item.status == Status::Done)
		})
		.count();
	assert_eq!(parent_done_transitions, 1);
}

// S4: with no applicable meta, an item cycles PENDING → ACTIVE → PENDING,
// accumulating retries, and FAILs after max_retries + 1 attempts.
#[test]
fn s4_no_matching_meta() {
	initialize();
	let h = Harness::new();
	let goal = h.inject(Role::Goal, "(goal_with_no_meta do_nothing)");

	for attempt in 1..=h.control.max_retries {
		assert_eq!(h.cycle(), CycleOutcome::Worked(goal.id));
		let current = h.kb.get(goal.id).unwrap();
		assert_eq!(current.status, Status::Pending);
		assert_eq!(current.retry_count(), attempt);
	}

	assert_eq!(h.cycle(), CycleOutcome::Worked(goal.id));
	let current = h.kb.get(goal.id).unwrap();
	assert_eq!(current.status, Status::Failed);
	assert_eq!(current.error_info(), Some(NO_MATCHING_META));
	assert_eq!(current.retry_count(), h.control.max_retries + 1);
}

// S5: an oriented equality rewrites a fact, and the derived item carries
// both supports.
#[test]
fn s5_rewrite_with_support() {
	initialize();
	let h = Harness::new();
	let eq = h.inject(Role::Note, "(= (f a) b)");
	let fact = h.inject(Role::Note, "(p (f a))");

	assert!(h.holds("(p b)"));
	let derived = h.kb.items().into_iter().find(|i| i.content == t("(p b)")).unwrap();
	assert!(derived.supported_by(eq.id));
	assert!(derived.supported_by(fact.id));

	// retracting the equality cascades into the rewritten fact
	h.kb.remove(eq.id);
	assert!(!h.holds("(p b)"));
}

// S6: capacity pressure evicts down to the ceiling, never touching the
// protected symbol.
#[test]
fn s6_forgetting() {
	initialize();
	let config = KbConfig { max_size: 1000, protected_symbols: vec!["axiom_of_interest".into()], ..Default::default() };
	let h = Harness::with_kb_config(config);

	let protected = h.kb.add(Item::new(Role::Note, t("axiom_of_interest"), Confidence::default())).unwrap();
	for i in 0..1100 {
		h.kb.add(Item::new(Role::Note, t(&format!("(filler {})", i)), Confidence::default())).unwrap();
	}
	assert!(h.kb.len() > 1000);

	h.kb.forget_pass();

	assert!(h.kb.len() <= 1000);
	assert!(h.kb.get(protected.id).is_some());
}

// Sampler fairness: selection frequencies track normalized confidence
// weights.
#[test]
fn sampler_distribution_tracks_confidence() {
	initialize();
	let h = Harness::new();
	let mut strong = Item::new(Role::Goal, t("(option strong)"), Confidence::new(8, 2));
	let weak = Item::new(Role::Goal, t("(option weak)"), Confidence::new(2, 8));
	// equalize attention so confidence is the only signal
	strong.importance = weak.importance;
	let strong = h.kb.add(strong).unwrap();
	h.kb.add(weak).unwrap();

	let mut strong_hits = 0usize;
	let draws = 2000;
	for _ in 0..draws {
		if h.kb.sample_pending().unwrap().id == strong.id {
			strong_hits += 1;
		}
	}

	// score ratio is 0.75 : 0.25; allow slack for the access-boost drift
	let frequency = strong_hits as f64 / draws as f64;
	assert!((0.60..0.92).contains(&frequency), "strong frequency {}", frequency);
}

// Persist → reload equals the pre-shutdown KB, with ACTIVE rewritten to
// PENDING, exercised through the full engine lifecycle.
#[test]
fn engine_lifecycle_roundtrip() {
	initialize();
	use noema::{ControlConfig, Engine, EngineBuilder};

	let dir = tempfile::tempdir().unwrap();
	let oracle = Arc::new(MockOracle::new());

	let mut engine = EngineBuilder::default()
		.data_dir(Some(dir.path().to_path_buf()))
		.oracle(oracle)
		.bootstrap_metas(vec![t(
			"(meta_def (greet ?w) (sequence (add_thought NOTE (greeted ?w) 0.9) (set_status DONE)))",
		)])
		.control(ControlConfig { poll_ms: 20, cycle_workers: 2, ..Default::default() })
		.build()
		.unwrap();
	engine.drive().unwrap();
	engine.inject("(greet world)", Role::Goal).unwrap();

	let kb = engine.kb().clone();
	let deadline = Instant::now() + Duration::from_secs(10);
	let done = loop {
		let finished = kb
			.items()
			.iter()
			.any(|i| i.content == t("(greet world)") && i.status == Status::Done);
		if finished {
			break true;
		}
		if Instant::now() > deadline {
			break false;
		}
		std::thread::sleep(Duration::from_millis(25));
	};
	assert!(done, "goal was not processed in time");
	assert!(kb.items().iter().any(|i| i.content == t("(greeted world)")));

	let greeted_id: ItemId = kb.items().iter().find(|i| i.content == t("(greeted world)")).unwrap().id;
	engine.shutdown().unwrap();

	// reload the snapshot into a fresh KB
	let restored = KnowledgeBase::new(KbConfig::default(), EventBus::new());
	let from_disk = persist::load_or_bootstrap(&restored, &dir.path().join("kb.noema"), &[]).unwrap();
	assert!(from_disk);
	assert_eq!(restored.get(greeted_id).unwrap().content, t("(greeted world)"));
	assert!(restored.items().iter().all(|i| i.status != Status::Active));
}
