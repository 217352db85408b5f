#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueMetrics {
    pub capacity: usize,
    /// Tasks waiting in the queue, including ones parked for a retry delay
    pub pending: usize,
    pub in_flight: usize,
    pub pushed: u64,
    pub popped: u64,
    pub requeued: u64,
    pub evicted: u64,
    pub peak_occupancy: usize,
}

impl QueueMetrics {
    /// Admitted tasks that have not reached a terminal state.
    pub fn occupancy(&self) -> usize {
        self.pending + self.in_flight
    }

    pub fn fill_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.occupancy() as f64 / self.capacity as f64
    }
}
