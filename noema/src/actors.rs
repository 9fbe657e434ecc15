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

//! The running engine: spawns the worker actors, the derivation listener
//! and the optional broadcast surface, and drives them until shutdown.

pub mod workers;

pub use self::workers::{run_cycle, CycleControl, CycleOutcome, NO_MATCHING_META};

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_std::future::timeout;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Deserialize;
use xtra::{prelude::*, spawn::Smol, Disconnected};

use self::workers::{CycleWorker, Reaper, Snapshotter};
use crate::{
	actions::Executor,
	broadcast::BroadcastServer,
	bus::Event,
	chain::{ChainConfig, Deriver},
	engine::Engine,
	error::Result,
	kb::KnowledgeBase,
	oracle::Oracle,
	parse,
	rules::RuleStore,
	types::{Confidence, Die, Item, Role},
};

/// Provides parameters that are passed in from the user.
/// Provides context that every worker may use.
pub struct SystemConfig {
	pub kb: Arc<KnowledgeBase>,
	pub rules: Arc<RwLock<RuleStore>>,
	pub oracle: Arc<dyn Oracle>,
	pub snapshot_path: PathBuf,
	pub broadcast_port: Option<u16>,
	pub broadcast_input: bool,
	pub control: ControlConfig,
	pub chain: ChainConfig,
}

impl Clone for SystemConfig {
	fn clone(&self) -> SystemConfig {
		SystemConfig {
			kb: Arc::clone(&self.kb),
			rules: Arc::clone(&self.rules),
			oracle: Arc::clone(&self.oracle),
			snapshot_path: self.snapshot_path.clone(),
			broadcast_port: self.broadcast_port,
			broadcast_input: self.broadcast_input,
			control: self.control,
			chain: self.chain.clone(),
		}
	}
}

#[derive(Copy, Clone, Debug, Deserialize)]
pub struct ControlConfig {
	/// Number of scheduler cycle workers.
	#[serde(default = "default_cycle_workers")]
	pub cycle_workers: usize,
	/// Maximum wall-clock seconds an item may stay ACTIVE.
	#[serde(default = "default_max_active_secs")]
	pub max_active_secs: u64,
	/// Failures beyond this mark an item FAILED.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Worker poll interval in milliseconds when idle.
	#[serde(default = "default_poll_ms")]
	pub poll_ms: u64,
	#[serde(default = "default_gc_interval_secs")]
	pub gc_interval_secs: u64,
	/// Terminal items idle longer than this are collected.
	#[serde(default = "default_gc_threshold_secs")]
	pub gc_threshold_secs: u64,
	#[serde(default = "default_snapshot_interval_secs")]
	pub snapshot_interval_secs: u64,
}

impl Default for ControlConfig {
	fn default() -> Self {
		Self {
			cycle_workers: default_cycle_workers(),
			max_active_secs: default_max_active_secs(),
			max_retries: default_max_retries(),
			poll_ms: default_poll_ms(),
			gc_interval_secs: default_gc_interval_secs(),
			gc_threshold_secs: default_gc_threshold_secs(),
			snapshot_interval_secs: default_snapshot_interval_secs(),
		}
	}
}

fn default_cycle_workers() -> usize {
	num_cpus::get().min(8)
}

const fn default_max_active_secs() -> u64 {
	30
}

const fn default_max_retries() -> u32 {
	3
}

const fn default_poll_ms() -> u64 {
	100
}

const fn default_gc_interval_secs() -> u64 {
	60
}

const fn default_gc_threshold_secs() -> u64 {
	3600
}

const fn default_snapshot_interval_secs() -> u64 {
	300
}

impl ControlConfig {
	fn cycle_control(&self) -> CycleControl {
		CycleControl { max_active_duration: Duration::from_secs(self.max_active_secs), max_retries: self.max_retries }
	}
}

struct Actors {
	cycles: Vec<Address<CycleWorker>>,
	reaper: Address<Reaper>,
	snapshotter: Address<Snapshotter>,
}

struct DeriverHandle {
	kill_tx: flume::Sender<()>,
	task: smol::Task<()>,
}

impl DeriverHandle {
	async fn kill(self) {
		let _ = self.kill_tx.send_async(()).await;
		self.task.await;
	}
}

/// Control the execution of the inference engine.
pub struct System {
	config: SystemConfig,
	start_tx: flume::Sender<()>,
	kill_tx: flume::Sender<()>,
	/// handle to the runtime thread driving the actors
	handle: Option<jod_thread::JoinHandle<Result<()>>>,
}

impl System {
	pub fn new(config: SystemConfig) -> Result<Self> {
		let (start_tx, kill_tx, handle) = Self::start(config.clone());
		Ok(Self { config, start_tx, kill_tx, handle: Some(handle) })
	}

	/// Start the actors and begin driving their execution.
	fn start(
		conf: SystemConfig,
	) -> (flume::Sender<()>, flume::Sender<()>, jod_thread::JoinHandle<Result<()>>) {
		let (tx_start, rx_start) = flume::bounded(1);
		let (tx_kill, rx_kill) = flume::bounded(1);

		let handle = jod_thread::spawn(move || {
			// block until we receive the message to start
			let _ = rx_start.recv();
			smol::block_on(Self::main_loop(conf, rx_kill))?;
			Ok(())
		});

		(tx_start, tx_kill, handle)
	}

	async fn main_loop(conf: SystemConfig, rx_kill: flume::Receiver<()>) -> Result<()> {
		// subscribe before any worker runs so no derivation event is missed
		let deriver = Self::spawn_deriver(&conf);
		let (input_tx, input_rx) = flume::unbounded::<String>();
		let broadcast = match conf.broadcast_port {
			Some(port) => {
				let events = conf.kb.bus().subscribe();
				let input = conf.broadcast_input.then(|| input_tx.clone());
				Some(BroadcastServer::spawn(port, events, input).await?)
			}
			None => None,
		};
		let actors = Self::spawn_actors(&conf);

		loop {
			futures::select! {
				line = input_rx.recv_async() => match line {
					Ok(line) => Self::inject_line(&conf, &line),
					Err(_) => break,
				},
				_ = rx_kill.recv_async() => break,
			}
		}

		Self::kill_actors(actors).await?;
		if let Some(broadcast) = broadcast {
			broadcast.kill().await;
		}
		deriver.kill().await;
		Ok(())
	}

	fn spawn_deriver(conf: &SystemConfig) -> DeriverHandle {
		let rx = conf.kb.bus().subscribe();
		let deriver = Deriver::new(conf.kb.clone(), conf.rules.clone(), conf.chain.clone());
		let (kill_tx, kill_rx) = flume::bounded(1);

		let task = smol::spawn(async move {
			deriver.catch_up();
			loop {
				futures::select! {
					event = rx.recv_async() => match event {
						Ok(event) => deriver.on_event(&event),
						Err(_) => break,
					},
					_ = kill_rx.recv_async() => break,
				}
			}
		});

		DeriverHandle { kill_tx, task }
	}

	fn spawn_actors(conf: &SystemConfig) -> Actors {
		let executor = Arc::new(Executor::new(conf.kb.clone(), conf.oracle.clone()));
		let control = conf.control;

		let cycles = (0..control.cycle_workers.max(1))
			.map(|_| {
				CycleWorker::new(executor.clone(), control.cycle_control(), Duration::from_millis(control.poll_ms))
					.create(None)
					.spawn(&mut Smol::Global)
			})
			.collect();

		let reaper = Reaper::new(
			conf.kb.clone(),
			Duration::from_secs(control.gc_interval_secs),
			Duration::from_secs(control.gc_threshold_secs),
		)
		.create(None)
		.spawn(&mut Smol::Global);

		let snapshotter = Snapshotter::new(
			conf.kb.clone(),
			conf.snapshot_path.clone(),
			Duration::from_secs(control.snapshot_interval_secs),
		)
		.create(None)
		.spawn(&mut Smol::Global);

		Actors { cycles, reaper, snapshotter }
	}

	async fn kill_actors(actors: Actors) -> Result<()> {
		let mut futs: Vec<BoxFuture<'_, Result<(), Disconnected>>> = Vec::new();
		for cycle in &actors.cycles {
			futs.push(Box::pin(cycle.send(Die)));
		}
		futs.push(Box::pin(actors.reaper.send(Die)));
		// bounded drain: in-flight cycles get a grace period, then we move on
		if timeout(Duration::from_secs(10), futures::future::join_all(futs)).await.is_err() {
			log::warn!("workers did not drain within the shutdown grace period");
		}
		// the snapshotter dies last; its Die handler takes the final snapshot
		let _ = actors.snapshotter.send(Die).await;
		Ok(())
	}

	fn inject_line(conf: &SystemConfig, line: &str) {
		let term = parse::term_or_note(line);
		conf.kb.bus().publish(Event::ExternalInput(term.clone()));
		conf.kb.add(Item::new(Role::Note, term, Confidence::default()));
	}
}

#[async_trait::async_trait(?Send)]
impl Engine for System {
	fn drive(&mut self) -> Result<()> {
		self.start_tx.send(()).map_err(|_| crate::error::NoemaError::Channel)?;
		Ok(())
	}

	async fn block_until_stopped(&self) {
		loop {
			smol::Timer::after(Duration::from_secs(1)).await;
		}
	}

	fn shutdown(mut self) -> Result<()> {
		let _ = self.kill_tx.send(());
		if let Some(handle) = self.handle.take() {
			handle.join()?;
		}
		Ok(())
	}

	fn boxed_shutdown(mut self: Box<Self>) -> Result<()> {
		let _ = self.kill_tx.send(());
		if let Some(handle) = self.handle.take() {
			handle.join()?;
		}
		Ok(())
	}

	fn kb(&self) -> &Arc<KnowledgeBase> {
		&self.config.kb
	}

	fn inject(&self, line: &str, role: Role) -> Result<()> {
		let term = parse::term_or_note(line);
		self.config.kb.bus().publish(Event::ExternalInput(term.clone()));
		self.config.kb.add(Item::new(role, term, Confidence::default()));
		Ok(())
	}
}
