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

//! Line-protocol broadcast surface.
//!
//! Serves engine events to TCP peers as one record per line:
//! `<kind> <priority> [<id>] <payload>`. With input enabled, peer lines
//! feed back into the engine as external input.

use std::sync::Arc;

use parking_lot::Mutex;
use smol::{
	io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
	net::{TcpListener, TcpStream},
};

use crate::{
	bus::Event,
	error::Result,
	types::Item,
};

fn item_record(kind: &str, item: &Item) -> String {
	format!("{} {:.2} [{}] {}", kind, item.belief.score(), item.id, item.content)
}

/// Serialize an event, or `None` for events the surface does not carry.
fn format_record(event: &Event) -> Option<String> {
	match event {
		Event::Added(item) => Some(item_record("assert-added", item)),
		Event::Retracted(item) => Some(item_record("retract", item)),
		Event::Evicted(item) => Some(item_record("evict", item)),
		Event::ExternalInput(term) => Some(format!("assert-input 0.50 [-] {}", term)),
		Event::OracleResponse { source, text } => {
			Some(format!("oracle-response 0.50 [{}] {}", source, text.replace('\n', "\\n")))
		}
		_ => None,
	}
}

pub struct BroadcastServer {
	kill_tx: flume::Sender<()>,
	task: Option<smol::Task<()>>,
}

impl BroadcastServer {
	/// Bind `port` and start serving `events`. Peer input lines, if
	/// enabled, go to `input_tx`.
	pub async fn spawn(
		port: u16,
		events: flume::Receiver<Event>,
		input_tx: Option<flume::Sender<String>>,
	) -> Result<BroadcastServer> {
		let listener = TcpListener::bind(("127.0.0.1", port)).await?;
		log::info!("broadcast surface listening on port {}", port);
		let (kill_tx, kill_rx) = flume::bounded(1);

		let peers: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));

		// cancelled (not signalled) on kill, so the single kill message is
		// left for the event loop below
		let accept_peers = peers.clone();
		let acceptor = smol::spawn(async move {
			loop {
				match listener.accept().await {
					Ok((stream, addr)) => {
						log::debug!("broadcast peer connected: {}", addr);
						if let Some(input_tx) = input_tx.clone() {
							smol::spawn(read_peer_lines(stream.clone(), input_tx)).detach();
						}
						accept_peers.lock().push(stream);
					}
					Err(e) => {
						log::error!("broadcast accept failed: {}", e);
						break;
					}
				}
			}
		});

		let task = smol::spawn(async move {
			loop {
				futures::select! {
					event = events.recv_async() => match event {
						Ok(event) => {
							if let Some(record) = format_record(&event) {
								broadcast_line(&peers, &record).await;
							}
						}
						Err(_) => break,
					},
					_ = kill_rx.recv_async() => break,
				}
			}
			acceptor.cancel().await;
		});

		Ok(BroadcastServer { kill_tx, task: Some(task) })
	}

	pub async fn kill(mut self) {
		let _ = self.kill_tx.send_async(()).await;
		if let Some(task) = self.task.take() {
			task.await;
		}
	}
}

async fn broadcast_line(peers: &Arc<Mutex<Vec<TcpStream>>>, line: &str) {
	let snapshot = { peers.lock().clone() };
	let mut dead = Vec::new();
	for mut peer in snapshot {
		if peer.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
			if let Ok(addr) = peer.peer_addr() {
				dead.push(addr);
			}
		}
	}
	if !dead.is_empty() {
		// unaddressable sockets are dead too
		peers.lock().retain(|p| p.peer_addr().map_or(false, |a| !dead.contains(&a)));
	}
}

async fn read_peer_lines(stream: TcpStream, input_tx: flume::Sender<String>) {
	let mut lines = BufReader::new(stream).lines();
	while let Some(Ok(line)) = futures::StreamExt::next(&mut lines).await {
		if line.trim().is_empty() {
			continue;
		}
		if input_tx.send_async(line).await.is_err() {
			break;
		}
	}
}
