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

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

#[derive(Debug, Clone)]
pub struct CliOpts {
	pub port: Option<u16>,
	pub kb_size: Option<usize>,
	pub rules: Option<PathBuf>,
	pub oracle_url: Option<String>,
	pub oracle_model: Option<String>,
	pub broadcast_input: bool,
	pub data_dir: Option<PathBuf>,
	pub log_level: log::LevelFilter,
}

impl CliOpts {
	pub fn parse() -> Self {
		let matches = Command::new("noemad")
			.about("probabilistic, reflective symbolic inference engine")
			.arg(
				Arg::new("port")
					.short('p')
					.long("port")
					.value_name("PORT")
					.help("serve the broadcast line protocol on this port")
					.value_parser(clap::value_parser!(u16)),
			)
			.arg(
				Arg::new("kb-size")
					.short('k')
					.long("kb-size")
					.value_name("N")
					.help("knowledge base capacity ceiling")
					.value_parser(clap::value_parser!(usize)),
			)
			.arg(
				Arg::new("rules")
					.short('r')
					.long("rules")
					.value_name("FILE")
					.help("rule file loaded at startup"),
			)
			.arg(Arg::new("oracle-url").short('o').long("oracle-url").value_name("URL").help("oracle HTTP endpoint"))
			.arg(
				Arg::new("oracle-model")
					.short('m')
					.long("oracle-model")
					.value_name("MODEL")
					.help("model name passed to the oracle"),
			)
			.arg(
				Arg::new("broadcast-input")
					.short('b')
					.long("broadcast-input")
					.action(ArgAction::SetTrue)
					.help("accept input lines from broadcast peers"),
			)
			.arg(Arg::new("data-dir").short('d').long("data-dir").value_name("DIR").help("snapshot and log directory"))
			.arg(Arg::new("verbose").short('v').long("verbose").action(ArgAction::Count).help("increase log verbosity"))
			.get_matches();

		let log_level = match matches.get_count("verbose") {
			0 => log::LevelFilter::Info,
			1 => log::LevelFilter::Debug,
			_ => log::LevelFilter::Trace,
		};

		CliOpts {
			port: matches.get_one::<u16>("port").copied(),
			kb_size: matches.get_one::<usize>("kb-size").copied(),
			rules: matches.get_one::<String>("rules").map(PathBuf::from),
			oracle_url: matches.get_one::<String>("oracle-url").cloned(),
			oracle_model: matches.get_one::<String>("oracle-model").cloned(),
			broadcast_input: matches.get_flag("broadcast-input"),
			data_dir: matches.get_one::<String>("data-dir").map(PathBuf::from),
			log_level,
		}
	}
}
