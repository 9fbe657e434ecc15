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

//! Periodic persistence worker. A failed save is logged and retried next
//! interval; the knowledge base stays authoritative in memory. The final
//! save happens on `Die`, during engine shutdown.

use std::{path::PathBuf, sync::Arc, time::Duration};

use xtra::prelude::*;

use crate::{kb::KnowledgeBase, persist, types::Die};

pub struct Snapshotter {
	kb: Arc<KnowledgeBase>,
	path: PathBuf,
	interval: Duration,
}

impl Snapshotter {
	pub fn new(kb: Arc<KnowledgeBase>, path: PathBuf, interval: Duration) -> Self {
		Self { kb, path, interval }
	}

	fn save(&self) {
		if let Err(e) = persist::save(&self.kb, &self.path) {
			log::error!("snapshot to {} failed: {}; state remains in memory", self.path.display(), e);
		}
	}
}

#[async_trait::async_trait]
impl Actor for Snapshotter {
	async fn started(&mut self, ctx: &mut Context<Self>) {
		ctx.notify_interval(self.interval, || Persist);
	}
}

pub struct Persist;

impl Message for Persist {
	type Result = ();
}

#[async_trait::async_trait]
impl Handler<Persist> for Snapshotter {
	async fn handle(&mut self, _: Persist, _: &mut Context<Self>) {
		self.save();
	}
}

#[async_trait::async_trait]
impl Handler<Die> for Snapshotter {
	async fn handle(&mut self, _: Die, ctx: &mut Context<Self>) {
		self.save();
		ctx.stop();
	}
}
