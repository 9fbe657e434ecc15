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

//! noema: a probabilistic, reflective symbolic inference engine.
//!
//! Logical terms with confidence metadata live in an indexed knowledge
//! base; meta-rules match pending items and run primitive actions against
//! them; forward chaining, rewriting and universal instantiation extend
//! the knowledge in the background. Everything runs on a small pool of
//! worker actors, with snapshot persistence and attention-weighted
//! forgetting keeping the base durable and bounded.

#![forbid(unsafe_code)]

pub mod actions;
mod actors;
pub mod broadcast;
pub mod bus;
pub mod chain;
mod error;
pub mod index;
pub mod kb;
mod logger;
pub mod oracle;
pub mod parse;
pub mod persist;
pub mod rules;
pub mod term;
pub mod types;
pub mod unify;

mod engine;

pub use self::actors::{
	run_cycle, ControlConfig, CycleControl, CycleOutcome, System, SystemConfig, NO_MATCHING_META,
};
pub use self::engine::{default_bootstrap_metas, Engine, EngineBuilder};
pub use self::error::{NoemaError, Result};
pub use self::logger::init as init_logger;

/// Get the path to a local noema directory where we can save data.
/// Platform | Value | Example
/// -- | -- | --
/// Linux | $XDG_DATA_HOME or $HOME/.local/share/noema | /home/alice/.local/share/noema/
/// macOS | $HOME/Library/Application Support/noema | /Users/Alice/Library/Application Support/noema/
/// Windows | {FOLDERID_LocalAppData}\noema | C:\Users\Alice\AppData\Local\noema
pub fn noema_default_dir() -> std::path::PathBuf {
	let mut path = dirs::data_local_dir().expect("Invalid home directory path");
	path.push("noema");
	path
}
