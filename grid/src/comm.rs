/// Synchronous collective communication among a fixed set of workers.
///
/// Every method is a collective call: all members of the communicator must
/// invoke it, in the same order, with compatible arguments, or the group
/// deadlocks. This is the only contract the streaming pipeline relies on;
/// the transport behind it is interchangeable.
pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Replicates `buf` from `root` into every member's `buf`. All members
    /// must pass buffers of the same length.
    fn bcast_bytes(&self, root: usize, buf: &mut [u8]);

    /// Concatenation of every member's equal-sized `contrib`, in rank order,
    /// available at every member.
    fn allgather(&self, contrib: &[u8]) -> Vec<u8>;

    fn barrier(&self);

    fn bcast_u64(&self, root: usize, value: u64) -> u64 {
        let mut buf: [u8; 8] = value.to_le_bytes();
        self.bcast_bytes(root, &mut buf);
        u64::from_le_bytes(buf)
    }

    fn bcast_u64s(&self, root: usize, values: &mut [u64]) {
        let mut buf: Vec<u8> = Vec::with_capacity(values.len() * 8);
        for &v in values.iter() {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        self.bcast_bytes(root, &mut buf);
        for (v, chunk) in values.iter_mut().zip(buf.chunks_exact(8)) {
            *v = u64::from_le_bytes(chunk.try_into().unwrap());
        }
    }
}

/// The one-worker communicator; every collective is a local no-op.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoloComm;

impl Comm for SoloComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn bcast_bytes(&self, root: usize, _buf: &mut [u8]) {
        assert_eq!(root, 0);
    }

    fn allgather(&self, contrib: &[u8]) -> Vec<u8> {
        contrib.to_vec()
    }

    fn barrier(&self) {}
}
