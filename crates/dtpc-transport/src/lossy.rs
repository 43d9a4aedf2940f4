use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::adapter::{Delivery, InMemoryTransport};

/// Per-call routing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    pub delivered: usize,
    pub dropped: usize,
    pub delayed: usize,
}

/// Seeded unreliable link between two in-memory transports.
///
/// Each routed bundle is dropped with `loss_percent` probability. Survivors
/// are held back one routing round with `reorder_percent` probability, so
/// they arrive after bundles sent later.
#[derive(Debug)]
pub struct LossyLink {
    rng: StdRng,
    loss_percent: u8,
    reorder_percent: u8,
    held: Vec<Delivery>,
}

impl LossyLink {
    pub fn new(seed: u64, loss_percent: u8, reorder_percent: u8) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            loss_percent: loss_percent.min(100),
            reorder_percent: reorder_percent.min(100),
            held: Vec::new(),
        }
    }

    /// A link that neither drops nor reorders.
    pub fn perfect() -> Self {
        Self::new(0, 0, 0)
    }

    /// Bundles currently held back for a later round.
    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn roll(&mut self, percent: u8) -> bool {
        percent > 0 && self.rng.gen_range(0..100_u8) < percent
    }

    /// Routes everything `from` has sent into `to`.
    pub fn route(&mut self, from: &mut InMemoryTransport, to: &mut InMemoryTransport) -> RouteReport {
        let mut report = RouteReport::default();
        let released = std::mem::take(&mut self.held);
        for out in from.take_outbound() {
            if self.roll(self.loss_percent) {
                trace!(dest = %out.request.dest, "lossy link dropped bundle");
                report.dropped += 1;
                continue;
            }
            let delivery = out.into_delivery();
            if self.roll(self.reorder_percent) {
                report.delayed += 1;
                self.held.push(delivery);
                continue;
            }
            to.enqueue_inbound(delivery);
            report.delivered += 1;
        }
        for delivery in released {
            to.enqueue_inbound(delivery);
            report.delivered += 1;
        }
        report
    }

    /// Releases every held bundle into `to`.
    pub fn flush(&mut self, to: &mut InMemoryTransport) -> usize {
        let held = std::mem::take(&mut self.held);
        let count = held.len();
        for delivery in held {
            to.enqueue_inbound(delivery);
        }
        count
    }
}
