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

//! In-process event bus.
//!
//! Fan-out is by channel: each subscriber gets an unbounded flume receiver
//! and drains it at its own pace, so publishing never blocks a knowledge
//! base write. Delivery is at-least-once within a cycle; nothing is
//! guaranteed about ordering across unrelated subscribers. Disconnected
//! receivers are dropped lazily on the next publish.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
	rules::Rule,
	term::Term,
	types::{Item, ItemId, Status},
	unify::{match_pattern, Subst},
};

#[derive(Debug, Clone)]
pub enum Event {
	Added(Arc<Item>),
	Retracted(Arc<Item>),
	Evicted(Arc<Item>),
	RuleAdded(Arc<Rule>),
	RuleRemoved(String),
	StatusChanged { item: Arc<Item>, previous: Status },
	ExternalInput(Term),
	OracleResponse { source: ItemId, text: String },
}

/// A pattern subscriber fires on `Added` items whose content the pattern
/// matches, and receives the bindings.
struct PatternSub {
	pattern: Term,
	tx: flume::Sender<(Arc<Item>, Subst)>,
}

#[derive(Default)]
struct BusInner {
	subs: RwLock<Vec<flume::Sender<Event>>>,
	pattern_subs: RwLock<Vec<PatternSub>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
	inner: Arc<BusInner>,
}

impl EventBus {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self) -> flume::Receiver<Event> {
		let (tx, rx) = flume::unbounded();
		self.inner.subs.write().push(tx);
		rx
	}

	/// Subscribe to `Added` items matching `pattern`.
	pub fn subscribe_pattern(&self, pattern: Term) -> flume::Receiver<(Arc<Item>, Subst)> {
		let (tx, rx) = flume::unbounded();
		self.inner.pattern_subs.write().push(PatternSub { pattern, tx });
		rx
	}

	pub fn publish(&self, event: Event) {
		if let Event::Added(item) = &event {
			self.dispatch_patterns(item);
		}
		let mut subs = self.inner.subs.write();
		subs.retain(|tx| tx.send(event.clone()).is_ok());
	}

	fn dispatch_patterns(&self, item: &Arc<Item>) {
		let mut subs = self.inner.pattern_subs.write();
		subs.retain(|sub| match match_pattern(&sub.pattern, &item.content) {
			Some(bindings) => sub.tx.send((item.clone(), bindings)).is_ok(),
			None => !sub.tx.is_disconnected(),
		});
	}

	pub fn subscriber_count(&self) -> usize {
		self.inner.subs.read().len()
	}
}
