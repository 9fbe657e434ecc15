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

//! The oracle collaborator seam.
//!
//! The engine only ever sees `generate(prompt) -> text`. The blocking HTTP
//! client is hopped off the executor with `smol::unblock` by callers, so an
//! arbitrarily slow oracle never stalls a scheduler worker's reactor or
//! holds a knowledge-base lock.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::error::{NoemaError, Result};

pub trait Oracle: Send + Sync {
	fn generate(&self, prompt: &str) -> Result<String>;
}

/// Call the oracle on the blocking-task pool.
pub async fn generate(oracle: Arc<dyn Oracle>, prompt: String) -> Result<String> {
	smol::unblock(move || oracle.generate(&prompt)).await
}

/// Oracle over a plain HTTP endpoint: POSTs `{"model": …, "prompt": …}`
/// and expects `{"text": …}` back. No particular vendor is assumed.
pub struct HttpOracle {
	agent: ureq::Agent,
	url: String,
	model: String,
}

impl HttpOracle {
	pub fn new<S: Into<String>>(url: S, model: S, timeout: Duration) -> Self {
		let agent = ureq::AgentBuilder::new().timeout(timeout).build();
		Self { agent, url: url.into(), model: model.into() }
	}
}

impl Oracle for HttpOracle {
	fn generate(&self, prompt: &str) -> Result<String> {
		let response = self
			.agent
			.post(&self.url)
			.send_json(ureq::json!({ "model": self.model, "prompt": prompt }))
			.map_err(|e| NoemaError::Oracle(e.to_string()))?;
		let body: serde_json::Value = response.into_json().map_err(|e| NoemaError::Oracle(e.to_string()))?;
		body.get("text")
			.and_then(|t| t.as_str())
			.map(str::to_string)
			.ok_or_else(|| NoemaError::Oracle("response missing `text` field".into()))
	}
}

/// Scripted oracle for tests and offline runs: answers from a queue, then
/// with an empty string.
#[derive(Default)]
pub struct MockOracle {
	responses: Mutex<VecDeque<String>>,
	prompts: Mutex<Vec<String>>,
}

impl MockOracle {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn enqueue<S: Into<String>>(&self, response: S) {
		self.responses.lock().push_back(response.into());
	}

	/// Prompts seen so far, oldest first.
	pub fn prompts(&self) -> Vec<String> {
		self.prompts.lock().clone()
	}
}

impl Oracle for MockOracle {
	fn generate(&self, prompt: &str) -> Result<String> {
		self.prompts.lock().push(prompt.to_string());
		Ok(self.responses.lock().pop_front().unwrap_or_default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mock_replays_in_order() {
		let oracle = MockOracle::new();
		oracle.enqueue("first");
		oracle.enqueue("second");

		assert_eq!(oracle.generate("a").unwrap(), "first");
		assert_eq!(oracle.generate("b").unwrap(), "second");
		assert_eq!(oracle.generate("c").unwrap(), "");
		assert_eq!(oracle.prompts(), vec!["a", "b", "c"]);
	}

	#[test]
	fn unblock_wrapper_runs() {
		let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::new());
		let text = smol::block_on(generate(oracle, "hi".into())).unwrap();
		assert_eq!(text, "");
	}
}
