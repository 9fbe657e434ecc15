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

//! Snapshot persistence.
//!
//! The knowledge base serializes to a single MessagePack blob behind a
//! magic tag and a format version. Items found ACTIVE in a loaded snapshot
//! are reset to PENDING: whatever worker claimed them died with the
//! previous process.

use std::{
	fs,
	io::{Read, Write},
	path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
	error::{NoemaError, Result},
	kb::KnowledgeBase,
	term::Term,
	types::{Confidence, Item, ItemId, Role, Status},
};

const MAGIC: &[u8; 5] = b"NOEMA";
const VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
	pub items: Vec<Item>,
	pub id_watermark: u64,
	pub protected: Vec<ItemId>,
}

impl Snapshot {
	pub fn of(kb: &KnowledgeBase) -> Snapshot {
		Snapshot { items: kb.snapshot_items(), id_watermark: kb.id_watermark(), protected: kb.protected_ids() }
	}
}

/// Write the KB to `path`. The write goes through a sibling temp file and a
/// rename, so a crash mid-save leaves the previous snapshot intact.
pub fn save(kb: &KnowledgeBase, path: &Path) -> Result<()> {
	let snapshot = Snapshot::of(kb);
	let body = rmp_serde::to_vec(&snapshot)?;

	let tmp = path.with_extension("tmp");
	{
		let mut file = fs::File::create(&tmp)?;
		file.write_all(MAGIC)?;
		file.write_all(&VERSION.to_be_bytes())?;
		file.write_all(&body)?;
		file.sync_all()?;
	}
	fs::rename(&tmp, path)?;
	log::info!("persisted {} items to {}", snapshot.items.len(), path.display());
	Ok(())
}

/// Read a snapshot from `path`. A missing or empty file is `Ok(None)`; a
/// present but unreadable one is an error so the caller can decide to fall
/// back to bootstrap.
pub fn load(path: &Path) -> Result<Option<Snapshot>> {
	let mut file = match fs::File::open(path) {
		Ok(f) => f,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(e.into()),
	};
	let mut bytes = Vec::new();
	file.read_to_end(&mut bytes)?;
	if bytes.is_empty() {
		return Ok(None);
	}
	if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
		return Err(NoemaError::Persistence(format!("{} is not a noema snapshot", path.display())));
	}
	let version = u16::from_be_bytes([bytes[MAGIC.len()], bytes[MAGIC.len() + 1]]);
	if version != VERSION {
		return Err(NoemaError::Persistence(format!("unsupported snapshot version {}", version)));
	}
	let snapshot: Snapshot = rmp_serde::from_read_ref(&bytes[MAGIC.len() + 2..])?;
	Ok(Some(snapshot))
}

/// Re-populate a KB from a snapshot, rewriting ACTIVE items to PENDING.
pub fn restore(kb: &KnowledgeBase, snapshot: Snapshot) {
	let count = snapshot.items.len();
	for mut item in snapshot.items {
		if item.status == Status::Active {
			item.status = Status::Pending;
		}
		kb.restore(item);
	}
	kb.set_id_watermark(snapshot.id_watermark);
	for id in snapshot.protected {
		kb.protect(id);
	}
	log::info!("restored {} items", count);
}

/// Load `path` into the KB, or seed it with the default meta-rules when
/// there is nothing (or nothing readable) to load. Returns `true` when the
/// snapshot was restored from disk.
pub fn load_or_bootstrap(kb: &KnowledgeBase, path: &Path, default_metas: &[Term]) -> Result<bool> {
	match load(path) {
		Ok(Some(snapshot)) => {
			restore(kb, snapshot);
			Ok(true)
		}
		Ok(None) => {
			bootstrap(kb, default_metas);
			Ok(false)
		}
		Err(e) => {
			log::error!("snapshot {} unreadable ({}); bootstrapping", path.display(), e);
			bootstrap(kb, default_metas);
			Ok(false)
		}
	}
}

fn bootstrap(kb: &KnowledgeBase, default_metas: &[Term]) {
	for meta in default_metas {
		kb.add(Item::new(Role::Meta, meta.clone(), Confidence::default()));
	}
	log::info!("bootstrapped {} default meta-rules", default_metas.len());
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{bus::EventBus, kb::KbConfig, parse::parse_term};

	fn kb() -> KnowledgeBase {
		KnowledgeBase::new(KbConfig::default(), EventBus::new())
	}

	#[test]
	fn roundtrip_preserves_everything() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("kb.noema");

		let original = kb();
		let a = original
			.add(Item::new(Role::Goal, parse_term("(plan trip)").unwrap(), Confidence::new(3, 1)))
			.unwrap();
		original
			.add(Item::new(Role::Strategy, parse_term("(step one)").unwrap(), Confidence::default())
				.with_parent(a.id))
			.unwrap();
		original.protect(a.id);

		save(&original, &path).unwrap();

		let restored = kb();
		assert!(load_or_bootstrap(&restored, &path, &[]).unwrap());
		assert_eq!(restored.snapshot_items(), original.snapshot_items());
		assert!(restored.is_protected(a.id));
		assert_eq!(restored.id_watermark(), original.id_watermark());
	}

	#[test]
	fn active_items_reset_to_pending() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("kb.noema");

		let original = kb();
		let item = original
			.add(Item::new(Role::Goal, parse_term("(busy work)").unwrap(), Confidence::default()))
			.unwrap();
		let mut active = (*item).clone();
		active.status = Status::Active;
		assert!(original.update(&item, active));

		save(&original, &path).unwrap();

		let restored = kb();
		load_or_bootstrap(&restored, &path, &[]).unwrap();
		assert_eq!(restored.get(item.id).unwrap().status, Status::Pending);
	}

	#[test]
	fn fresh_ids_never_collide_after_restore() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("kb.noema");

		let original = kb();
		let old = original
			.add(Item::new(Role::Note, parse_term("(p a)").unwrap(), Confidence::default()))
			.unwrap();
		save(&original, &path).unwrap();

		let restored = kb();
		load_or_bootstrap(&restored, &path, &[]).unwrap();
		let fresh = restored
			.add(Item::new(Role::Note, parse_term("(p b)").unwrap(), Confidence::default()))
			.unwrap();
		assert!(fresh.id > old.id);
	}

	#[test]
	fn corrupt_snapshot_falls_back_to_bootstrap() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("kb.noema");
		fs::write(&path, b"definitely not a snapshot").unwrap();

		assert!(matches!(load(&path), Err(NoemaError::Persistence(_))));

		let target = kb();
		let metas = vec![parse_term("(meta_def ?t noop)").unwrap()];
		assert!(!load_or_bootstrap(&target, &path, &metas).unwrap());
		assert_eq!(target.active_metas().len(), 1);
	}

	#[test]
	fn missing_file_bootstraps() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("absent.noema");

		let target = kb();
		let metas = vec![parse_term("(meta_def ?t noop)").unwrap()];
		assert!(!load_or_bootstrap(&target, &path, &metas).unwrap());
		assert_eq!(target.len(), 1);
	}
}
