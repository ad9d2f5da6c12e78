/// Running totals of successful allocations and releases. The two only ever
/// grow; when they agree, nothing has (obviously) leaked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    allocations: usize,
    releases: usize,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            allocations: 0,
            releases: 0,
        }
    }

    pub(crate) fn record_allocation(&mut self) {
        self.allocations += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
    }

    pub const fn allocations(&self) -> usize {
        self.allocations
    }

    pub const fn releases(&self) -> usize {
        self.releases
    }

    /// Allocations that have no matching release (yet). Zero if there have
    /// somehow been more releases than allocations.
    pub const fn outstanding(&self) -> usize {
        self.allocations.saturating_sub(self.releases)
    }

    pub const fn is_balanced(&self) -> bool {
        self.allocations == self.releases
    }
}
