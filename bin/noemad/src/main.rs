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

mod cli_opts;

use std::{
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	thread,
	time::Duration,
};

use anyhow::Result;

use noema::{Engine, EngineBuilder};

pub fn main() {
	if let Err(e) = run() {
		log::error!("initialization failed: {}", e);
		eprintln!("noemad: {}", e);
		std::process::exit(1);
	}
}

fn run() -> Result<()> {
	let opts = cli_opts::CliOpts::parse();
	let data_dir = opts.data_dir.clone().unwrap_or_else(noema::noema_default_dir);
	noema::init_logger(opts.log_level, log::LevelFilter::Debug, &data_dir)?;

	let mut engine = EngineBuilder::default()
		.data_dir(Some(data_dir))
		.kb_size(opts.kb_size)
		.rules(opts.rules)
		.oracle_url(opts.oracle_url)
		.oracle_model(opts.oracle_model)
		.broadcast_port(opts.port)
		.broadcast_input(opts.broadcast_input)
		.build()?;
	engine.drive()?;
	log::info!("noema engine running; ctrl-c to stop");

	let running = Arc::new(AtomicBool::new(true));
	let r = running.clone();
	ctrlc::set_handler(move || {
		r.store(false, Ordering::SeqCst);
	})
	.expect("Error setting Ctrl-C handler");

	while running.load(Ordering::SeqCst) {
		thread::sleep(Duration::from_millis(100));
	}

	log::info!("shutting down; persisting the knowledge base");
	engine.shutdown()?;
	Ok(())
}
