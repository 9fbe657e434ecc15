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

//! Garbage collection worker: removes stale terminal items on a timer and
//! enforces the knowledge base's capacity ceiling.

use std::{sync::Arc, time::Duration};

use xtra::prelude::*;

use crate::{
	kb::KnowledgeBase,
	types::{now_millis, Die},
};

pub struct Reaper {
	kb: Arc<KnowledgeBase>,
	interval: Duration,
	/// Terminal items idle longer than this are collected.
	threshold: Duration,
}

impl Reaper {
	pub fn new(kb: Arc<KnowledgeBase>, interval: Duration, threshold: Duration) -> Self {
		Self { kb, interval, threshold }
	}

	fn sweep(&self) {
		let cutoff = now_millis() - self.threshold.as_millis() as i64;
		let collected = self.kb.collect_stale(cutoff);
		if !collected.is_empty() {
			log::info!("collected {} stale terminal items", collected.len());
		}

		let evicted = self.kb.forget_pass();
		if !evicted.is_empty() {
			log::info!("evicted {} items under capacity pressure", evicted.len());
		}
	}
}

#[async_trait::async_trait]
impl Actor for Reaper {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		ctx.notify_interval(self.interval, || Sweep);
	}
}

pub struct Sweep;

impl Message for Sweep {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Sweep> for Reaper {
	async fn handle(&mut self, _: Sweep, _: &mut Context<Self>) {
		self.sweep();
	}
}

#[async_trait::async_trait]
impl Handler<Die> for Reaper {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		ctx.stop();
	}
}
