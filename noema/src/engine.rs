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

//! Engine lifecycle and construction.

use std::{env, fs, path::PathBuf, sync::Arc, time::Duration};

use parking_lot::RwLock;

use crate::{
	actors::{ControlConfig, System, SystemConfig},
	bus::EventBus,
	chain::ChainConfig,
	error::{NoemaError, Result},
	kb::{KbConfig, KnowledgeBase},
	oracle::{HttpOracle, MockOracle, Oracle},
	parse,
	persist,
	rules::{RuleStore, EQUIVALENT, IMPLIES},
	term::Term,
	types::{Confidence, Item, Role},
};

const DATA_DIR_VAR: &str = "NOEMA_DATA_DIR";
const SNAPSHOT_FILE: &str = "kb.noema";

/// The control interface of a running engine.
#[async_trait::async_trait(?Send)]
pub trait Engine {
	/// start driving the execution of the engine
	fn drive(&mut self) -> Result<()>;

	/// this method will block indefinitely
	async fn block_until_stopped(&self);

	/// shutdown the engine, persisting the knowledge base
	fn shutdown(self) -> Result<()>
	where
		Self: Sized;

	/// Shutdown the engine when self is boxed (useful when erasing the
	/// concrete type)
	fn boxed_shutdown(self: Box<Self>) -> Result<()>;

	/// The knowledge base the engine is running over
	fn kb(&self) -> &Arc<KnowledgeBase>;

	/// Feed one line of surface input into the engine
	fn inject(&self, line: &str, role: Role) -> Result<()>;
}

/// The default meta-rules injected when there is no snapshot to restore.
pub fn default_bootstrap_metas() -> Vec<Term> {
	["(meta_def (decompose ?g) (sequence (set_status WAITING_CHILDREN) (generate_thoughts ?g)))"]
		.iter()
		.map(|src| parse::parse_term(src).expect("bootstrap metas parse"))
		.collect()
}

pub struct EngineBuilder {
	data_dir: Option<PathBuf>,
	kb_size: Option<usize>,
	rules_path: Option<PathBuf>,
	oracle: Option<Arc<dyn Oracle>>,
	oracle_url: Option<String>,
	oracle_model: Option<String>,
	broadcast_port: Option<u16>,
	broadcast_input: bool,
	bootstrap_metas: Vec<Term>,
	kb_config: KbConfig,
	control: ControlConfig,
	chain: ChainConfig,
}

impl Default for EngineBuilder {
	fn default() -> Self {
		Self {
			data_dir: None,
			kb_size: None,
			rules_path: None,
			oracle: None,
			oracle_url: None,
			oracle_model: None,
			broadcast_port: None,
			broadcast_input: false,
			bootstrap_metas: default_bootstrap_metas(),
			kb_config: KbConfig::default(),
			control: ControlConfig::default(),
			chain: ChainConfig::default(),
		}
	}
}

impl EngineBuilder {
	/// Directory for the snapshot and logs.
	///
	/// # Default
	/// defaults to the environment variable NOEMA_DATA_DIR, then to the
	/// platform data directory
	pub fn data_dir<S: Into<PathBuf>>(mut self, dir: Option<S>) -> Self {
		self.data_dir = dir.map(Into::into);
		self
	}

	/// Knowledge-base capacity ceiling.
	pub fn kb_size(mut self, size: Option<usize>) -> Self {
		self.kb_size = size;
		self
	}

	/// Rule file loaded at startup: one term per line, `implies`,
	/// `equivalent` or `meta_def` forms.
	pub fn rules<S: Into<PathBuf>>(mut self, path: Option<S>) -> Self {
		self.rules_path = path.map(Into::into);
		self
	}

	/// Use a caller-provided oracle instead of HTTP.
	pub fn oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
		self.oracle = Some(oracle);
		self
	}

	pub fn oracle_url<S: Into<String>>(mut self, url: Option<S>) -> Self {
		self.oracle_url = url.map(Into::into);
		self
	}

	pub fn oracle_model<S: Into<String>>(mut self, model: Option<S>) -> Self {
		self.oracle_model = model.map(Into::into);
		self
	}

	/// Serve the line-protocol broadcast surface on this port.
	pub fn broadcast_port(mut self, port: Option<u16>) -> Self {
		self.broadcast_port = port;
		self
	}

	/// Whether broadcast peers may inject input lines.
	pub fn broadcast_input(mut self, enabled: bool) -> Self {
		self.broadcast_input = enabled;
		self
	}

	/// Meta-rules to seed an empty knowledge base with.
	pub fn bootstrap_metas(mut self, metas: Vec<Term>) -> Self {
		self.bootstrap_metas = metas;
		self
	}

	pub fn kb_config(mut self, config: KbConfig) -> Self {
		self.kb_config = config;
		self
	}

	pub fn control(mut self, control: ControlConfig) -> Self {
		self.control = control;
		self
	}

	pub fn chain(mut self, chain: ChainConfig) -> Self {
		self.chain = chain;
		self
	}

	/// Build and wire the engine: restore (or bootstrap) the knowledge
	/// base, load the rule file, and spawn the system.
	pub fn build(mut self) -> Result<impl Engine> {
		let data_dir = match self.data_dir.take() {
			Some(dir) => dir,
			None => match env::var(DATA_DIR_VAR) {
				Ok(dir) => dir.into(),
				Err(_) => crate::noema_default_dir(),
			},
		};
		fs::create_dir_all(&data_dir)?;
		let snapshot_path = data_dir.join(SNAPSHOT_FILE);

		if let Some(size) = self.kb_size {
			self.kb_config.max_size = size;
		}

		let bus = EventBus::new();
		let kb = Arc::new(KnowledgeBase::new(self.kb_config.clone(), bus));
		persist::load_or_bootstrap(&kb, &snapshot_path, &self.bootstrap_metas)?;

		let rules = Arc::new(RwLock::new(RuleStore::new()));
		if let Some(path) = &self.rules_path {
			let loaded = load_rule_file(&kb, &rules, path)?;
			log::info!("loaded {} rule terms from {}", loaded, path.display());
		}

		let oracle: Arc<dyn Oracle> = match (self.oracle, &self.oracle_url) {
			(Some(oracle), _) => oracle,
			(None, Some(url)) => {
				let model = self.oracle_model.clone().unwrap_or_else(|| "default".into());
				Arc::new(HttpOracle::new(url.clone(), model, Duration::from_secs(60)))
			}
			(None, None) => {
				log::warn!("no oracle configured; generate_thoughts and call_oracle will produce nothing");
				Arc::new(MockOracle::new())
			}
		};

		System::new(SystemConfig {
			kb,
			rules,
			oracle,
			snapshot_path,
			broadcast_port: self.broadcast_port,
			broadcast_input: self.broadcast_input,
			control: self.control,
			chain: self.chain,
		})
	}
}

/// Load a rule file: `implies`/`equivalent` forms go to the registry,
/// `meta_def` forms commit as META items, anything else as a NOTE fact.
fn load_rule_file(kb: &KnowledgeBase, rules: &RwLock<RuleStore>, path: &std::path::Path) -> Result<usize> {
	let text = fs::read_to_string(path)
		.map_err(|e| NoemaError::Persistence(format!("rules file {}: {}", path.display(), e)))?;
	let terms = parse::parse_lines(&text)?;
	let count = terms.len();

	for term in terms {
		match term.head() {
			Some(IMPLIES) | Some(EQUIVALENT) if term.args().len() == 2 => {
				rules.write().add(&term, 1.0)?;
				// keep the rule visible as knowledge too
				kb.add(Item::new(Role::Note, term, Confidence::default()));
			}
			Some(crate::actions::META_DEF) => {
				kb.add(Item::new(Role::Meta, term, Confidence::default()));
			}
			_ => {
				kb.add(Item::new(Role::Note, term, Confidence::default()));
			}
		}
	}
	Ok(count)
}
