//! Mask relay between views, plus startup file collection.
//!
//! Every open view (the editor and any player views) registers an endpoint
//! on a shared [`MaskHub`] under its own UUID. When one view commits a mask
//! stroke it broadcasts the PNG composite; every other endpoint receives it
//! and applies it with `CanvasState::apply_remote_mask`.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

// ============================================================================
// Collect positional file arguments from the command line
// ============================================================================

/// Flags whose value is the following argument.
const VALUE_FLAGS: &[&str] = &[
    "--map",
    "-m",
    "--mask",
    "--output",
    "-o",
    "--export-mask",
    "--gutter",
    "--mask-fill",
    "--background",
    "--zoom",
    "--config",
];

/// Positional paths (not flags or flag values) that exist on disk.
/// Called only in GUI mode, after CLI detection.
pub fn collect_startup_files() -> Vec<PathBuf> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    startup_candidates(&args).into_iter().filter(|p| p.exists()).collect()
}

fn startup_candidates(args: &[String]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg.starts_with('-') {
            if VALUE_FLAGS.contains(&arg.as_str()) {
                skip_next = true;
            }
            continue;
        }
        files.push(PathBuf::from(arg));
    }
    files
}

// ============================================================================
// Mask hub
// ============================================================================

/// A mask composite travelling between views.
#[derive(Clone, Debug)]
pub struct MaskMessage {
    pub from: Uuid,
    pub png: Arc<Vec<u8>>,
}

type Peers = Arc<Mutex<Vec<(Uuid, Sender<MaskMessage>)>>>;

/// Shared registry of connected views.
#[derive(Clone, Default)]
pub struct MaskHub {
    peers: Peers,
}

impl MaskHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MaskEndpoint {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel();
        if let Ok(mut peers) = self.peers.lock() {
            peers.push((id, tx));
        }
        log_info!("View {} joined mask channel", id);
        MaskEndpoint { id, peers: self.peers.clone(), receiver: rx }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// One view's connection to the hub. Disconnects on drop.
pub struct MaskEndpoint {
    id: Uuid,
    peers: Peers,
    receiver: Receiver<MaskMessage>,
}

impl MaskEndpoint {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Send to every other view. Returns how many received it; peers whose
    /// receiver is gone are dropped.
    pub fn broadcast(&self, png: Arc<Vec<u8>>) -> usize {
        let Ok(mut peers) = self.peers.lock() else { return 0 };
        let msg = MaskMessage { from: self.id, png };
        let mut delivered = 0;
        peers.retain(|(id, tx)| {
            if *id == self.id {
                return true;
            }
            match tx.send(msg.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    log_warn!("Dropping disconnected view {}", id);
                    false
                }
            }
        });
        delivered
    }

    pub fn try_recv_all(&self) -> Vec<MaskMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.receiver.try_recv() {
            out.push(msg);
        }
        out
    }
}

impl Drop for MaskEndpoint {
    fn drop(&mut self) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.retain(|(id, _)| *id != self.id);
        }
    }
}
