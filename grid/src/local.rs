use std::sync::{Arc, Barrier, Mutex};

use crate::Comm;

struct Shared {
    slots: Vec<Mutex<Vec<u8>>>,
    barrier: Barrier,
}

/// Shared-memory transport: one communicator handle per worker thread,
/// exchanging buffers through mutex-guarded slots with a barrier on each
/// side of the exchange.
pub struct LocalComm {
    shared: Arc<Shared>,
    rank: usize,
}

/// Creates the `n` handles of one communication group, indexed by rank.
pub fn local_comms(n: usize) -> Vec<LocalComm> {
    assert!(n >= 1);
    let shared: Arc<Shared> = Arc::new(Shared {
        slots: (0..n).map(|_| Mutex::new(Vec::new())).collect(),
        barrier: Barrier::new(n),
    });
    (0..n)
        .map(|rank| LocalComm {
            shared: shared.clone(),
            rank,
        })
        .collect()
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.slots.len()
    }

    fn bcast_bytes(&self, root: usize, buf: &mut [u8]) {
        assert!(root < self.size());
        if self.rank == root {
            let mut slot = self.shared.slots[root].lock().unwrap();
            slot.clear();
            slot.extend_from_slice(buf);
        }
        self.shared.barrier.wait();
        if self.rank != root {
            let slot = self.shared.slots[root].lock().unwrap();
            assert_eq!(slot.len(), buf.len(), "broadcast length mismatch");
            buf.copy_from_slice(&slot);
        }
        self.shared.barrier.wait();
    }

    fn allgather(&self, contrib: &[u8]) -> Vec<u8> {
        {
            let mut slot = self.shared.slots[self.rank].lock().unwrap();
            slot.clear();
            slot.extend_from_slice(contrib);
        }
        self.shared.barrier.wait();
        let mut out: Vec<u8> = Vec::with_capacity(contrib.len() * self.size());
        for r in 0..self.size() {
            let slot = self.shared.slots[r].lock().unwrap();
            assert_eq!(slot.len(), contrib.len(), "allgather length mismatch");
            out.extend_from_slice(&slot);
        }
        self.shared.barrier.wait();
        out
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}
