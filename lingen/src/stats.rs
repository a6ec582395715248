use fnv::FnvHashMap;

/// Accounting for the multiply/middle-product kernels, owned by the caller
/// and threaded through every call instead of living in process-wide state.
#[derive(Default, Debug)]
pub struct TreeStats {
    ops: FnvHashMap<&'static str, OpStats>,
}

#[derive(Default, Debug, Clone, Copy)]
pub struct OpStats {
    pub calls: u64,
    pub coeffs: u64,
    pub transform_bytes: u64,
}

impl TreeStats {
    pub fn new() -> TreeStats {
        TreeStats::default()
    }

    pub fn record(&mut self, op: &'static str, coeffs: u64, transform_bytes: u64) {
        let entry: &mut OpStats = self.ops.entry(op).or_default();
        entry.calls += 1;
        entry.coeffs += coeffs;
        entry.transform_bytes += transform_bytes;
    }

    pub fn get(&self, op: &str) -> Option<&OpStats> {
        self.ops.get(op)
    }
}
