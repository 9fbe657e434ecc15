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

use std::io;
use thiserror::Error;

pub type Result<T, E = NoemaError> = std::result::Result<T, E>;

/// Noema Error Enum
///
/// Unification failure is not represented here; it is routine control flow
/// and surfaces as `None` from the unifier.
#[derive(Debug, Error)]
pub enum NoemaError {
	// Rust std io error
	#[error(transparent)]
	Io(#[from] io::Error),

	// encoding error
	#[error(transparent)]
	Serialization(#[from] serde_json::Error),
	#[error("snapshot encode: {0}")]
	SnapshotEncode(#[from] rmp_serde::encode::Error),
	#[error("snapshot decode: {0}")]
	SnapshotDecode(#[from] rmp_serde::decode::Error),

	#[error("parse error: {0}")]
	Parse(String),

	/// An action argument remained free after substitution.
	#[error("unbound variable {0}")]
	UnboundVariable(String),
	/// Malformed action, wrong arity, unknown primitive.
	#[error("action execution: {0}")]
	Action(String),
	#[error("oracle: {0}")]
	Oracle(String),
	/// Uncaught error during a scheduler cycle.
	#[error("cycle: {0}")]
	Cycle(String),

	#[error("persistence: {0}")]
	Persistence(String),

	// actor and channel error
	#[error("Trying to send to disconnected actor")]
	Disconnected,
	#[error("Sending on a disconnected channel")]
	Channel,

	#[error("{0}")]
	Shutdown(String),
}

impl From<xtra::Disconnected> for NoemaError {
	fn from(_: xtra::Disconnected) -> Self {
		Self::Disconnected
	}
}

impl<T> From<flume::SendError<T>> for NoemaError {
	fn from(_: flume::SendError<T>) -> Self {
		Self::Channel
	}
}
