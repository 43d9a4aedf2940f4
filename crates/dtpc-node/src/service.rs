//! Threaded engine: delivery driver, clock and receiver workers around one
//! locked [`DtpcNode`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dtpc_core::{DtnTime, Eid, ProfileId, TopicId};
use dtpc_transport::adapter::BundleTransport;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::delivery::DeliveryOutcome;
use crate::error::EngineError;
use crate::outbound::{InsertOutcome, InsertRejection};
use crate::profile::Profile;
use crate::runtime::DtpcNode;
use crate::signal::{Semaphore, SignalOutcome};
use crate::state::{DeliveredItem, EngineStats, Wakeups};

/// Seconds between the Unix epoch and the DTN epoch (2000-01-01T00:00:00Z).
const DTN_EPOCH_OFFSET: u64 = 946_684_800;

/// Source of the engine's notion of "now" in DTN seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> DtnTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DtnTime {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs().saturating_sub(DTN_EPOCH_OFFSET))
    }
}

/// Clock advanced explicitly; used by tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: DtnTime) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn advance(&self, seconds: u64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DtnTime {
        self.0.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DtnTime {
        (**self).now()
    }
}

/// Result of [`Subscription::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Item(DeliveredItem),
    TimedOut,
    /// [`Subscription::interrupt`] was called.
    Interrupted,
    Stopped,
}

struct Shared<T: BundleTransport> {
    node: Mutex<DtpcNode<T>>,
    clock: Box<dyn Clock>,
    config: EngineConfig,
    driver: Semaphore,
    /// Never given; ended on stop so that timed waits double as sleeps.
    stop: Semaphore,
    stopped: AtomicBool,
    topic_signals: Mutex<BTreeMap<TopicId, Arc<Semaphore>>>,
}

impl<T: BundleTransport> Shared<T> {
    /// Runs one locked step and hands out the wake-ups it produced.
    fn with_node<R>(&self, f: impl FnOnce(&mut DtpcNode<T>, DtnTime) -> R) -> R {
        let now = self.clock.now();
        let (result, wakeups) = {
            let mut node = self.node.lock();
            let result = f(&mut node, now);
            (result, node.take_wakeups())
        };
        self.wake(wakeups);
        result
    }

    fn wake(&self, wakeups: Wakeups) {
        if wakeups.driver > 0 {
            self.driver.give();
        }
        if wakeups.topics.is_empty() {
            return;
        }
        let signals = self.topic_signals.lock();
        for topic in &wakeups.topics {
            if let Some(signal) = signals.get(topic) {
                signal.give();
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`; false once the engine is stopping.
    fn pause(&self, duration: Duration) -> bool {
        self.stop.take_timeout(duration) != SignalOutcome::Ended
    }
}

/// DTPC engine running its delivery driver, clock and receiver on threads.
pub struct Engine<T: BundleTransport + Send + 'static> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: BundleTransport + Send + 'static> Engine<T> {
    pub fn start(node: DtpcNode<T>) -> Result<Self, EngineError> {
        Self::start_with_clock(node, SystemClock)
    }

    pub fn start_with_clock(
        node: DtpcNode<T>,
        clock: impl Clock + 'static,
    ) -> Result<Self, EngineError> {
        let config = node.config.clone();
        let shared = Arc::new(Shared {
            node: Mutex::new(node),
            clock: Box::new(clock),
            config,
            driver: Semaphore::new(),
            stop: Semaphore::new(),
            stopped: AtomicBool::new(false),
            topic_signals: Mutex::new(BTreeMap::new()),
        });
        // Restored state may already hold ready ADUs.
        shared.driver.give();

        let mut engine = Self {
            shared,
            workers: Vec::new(),
        };
        let workers: [(&str, fn(Arc<Shared<T>>)); 3] = [
            ("dtpc-driver", run_driver),
            ("dtpc-clock", run_clock),
            ("dtpc-receiver", run_receiver),
        ];
        for (name, worker) in workers {
            let shared = Arc::clone(&engine.shared);
            let spawned = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || worker(shared));
            match spawned {
                Ok(handle) => engine.workers.push(handle),
                Err(err) => {
                    engine.stop();
                    return Err(EngineError::Spawn(err));
                }
            }
        }
        info!("dtpc engine started");
        Ok(engine)
    }

    /// Inserts one item, retrying with backoff while outbound storage is full.
    pub fn insert(
        &self,
        profile: ProfileId,
        dest: &Eid,
        topic: TopicId,
        payload: Vec<u8>,
    ) -> Result<InsertOutcome, EngineError> {
        let mut retries = 0;
        loop {
            if self.shared.is_stopped() {
                return Ok(InsertOutcome::Rejected(InsertRejection::Stopped));
            }
            let outcome = self
                .shared
                .with_node(|node, now| node.insert(profile, dest, topic, payload.clone(), now))?;
            let full = matches!(
                outcome,
                InsertOutcome::Rejected(InsertRejection::StoreExhausted { .. })
            );
            if !full || retries >= self.shared.config.insert_retry_attempts {
                return Ok(outcome);
            }
            retries += 1;
            debug!(retries, "outbound store full; retrying insert");
            if !self.shared.pause(self.shared.config.insert_retry_backoff()) {
                return Ok(InsertOutcome::Rejected(InsertRejection::Stopped));
            }
        }
    }

    /// Registers the only subscriber for `topic`.
    pub fn open_topic(&self, topic: TopicId) -> Result<Subscription<T>, EngineError> {
        if self.shared.is_stopped() {
            return Err(EngineError::Stopped);
        }
        self.shared.with_node(|node, _| node.open_topic(topic))?;
        let signal = Arc::new(Semaphore::new());
        self.shared
            .topic_signals
            .lock()
            .insert(topic, Arc::clone(&signal));
        Ok(Subscription {
            topic,
            shared: Arc::clone(&self.shared),
            signal,
        })
    }

    pub fn add_profile(&self, profile: Profile) -> Result<(), EngineError> {
        self.shared.with_node(|node, _| node.add_profile(profile))
    }

    pub fn remove_profile(&self, id: ProfileId) -> Result<Profile, EngineError> {
        self.shared.with_node(|node, _| node.remove_profile(id))
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.node.lock().stats()
    }

    /// Runs `f` against the locked node, then delivers its wake-ups.
    pub fn with_node<R>(&self, f: impl FnOnce(&mut DtpcNode<T>, DtnTime) -> R) -> R {
        self.shared.with_node(f)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Ends every signal, so blocked callers return, and joins the workers.
    pub fn stop(&mut self) {
        if self.shared.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.stop.end();
        self.shared.driver.end();
        for signal in self.shared.topic_signals.lock().values() {
            signal.end();
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("dtpc worker panicked");
            }
        }
        info!("dtpc engine stopped");
    }
}

impl<T: BundleTransport + Send + 'static> Drop for Engine<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Receiving end of one topic. Dropping it closes the topic.
pub struct Subscription<T: BundleTransport> {
    topic: TopicId,
    shared: Arc<Shared<T>>,
    signal: Arc<Semaphore>,
}

impl<T: BundleTransport> Subscription<T> {
    pub fn topic(&self) -> TopicId {
        self.topic
    }

    /// Waits for the next item; `None` waits without a timeout.
    pub fn receive(&self, timeout: Option<Duration>) -> ReceiveOutcome {
        loop {
            if let Some(item) = self.shared.node.lock().pop_item(self.topic) {
                return ReceiveOutcome::Item(item);
            }
            if self.shared.is_stopped() {
                return ReceiveOutcome::Stopped;
            }
            let outcome = match timeout {
                Some(timeout) => self.signal.take_timeout(timeout),
                None => self.signal.take(),
            };
            match outcome {
                SignalOutcome::Given => continue,
                SignalOutcome::TimedOut => return ReceiveOutcome::TimedOut,
                SignalOutcome::Interrupted => return ReceiveOutcome::Interrupted,
                SignalOutcome::Ended => return ReceiveOutcome::Stopped,
            }
        }
    }

    /// Wakes a blocked [`Subscription::receive`] with `Interrupted`.
    pub fn interrupt(&self) {
        self.signal.interrupt();
    }
}

impl<T: BundleTransport> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.shared.topic_signals.lock().remove(&self.topic);
        self.shared.node.lock().close_topic(self.topic);
    }
}

fn run_driver<T: BundleTransport>(shared: Arc<Shared<T>>) {
    debug!("delivery driver running");
    loop {
        match shared.driver.take() {
            SignalOutcome::Ended => break,
            SignalOutcome::Given | SignalOutcome::Interrupted | SignalOutcome::TimedOut => {}
        }
        while !shared.is_stopped() {
            let backoff = match shared.with_node(|node, now| node.deliver_next(now)) {
                Ok(DeliveryOutcome::Idle) => break,
                Ok(DeliveryOutcome::Sent { .. } | DeliveryOutcome::Expired { .. }) => continue,
                Ok(DeliveryOutcome::Congested) => shared.config.congestion_backoff(),
                Err(EngineError::Transport(reason)) => {
                    warn!(%reason, "delivery failed; retrying after backoff");
                    shared.config.delivery_retry_backoff()
                }
                Err(err) => {
                    warn!(%err, "dropped undeliverable ADU");
                    continue;
                }
            };
            if !shared.pause(backoff) {
                break;
            }
        }
    }
    debug!("delivery driver stopped");
}

fn run_clock<T: BundleTransport>(shared: Arc<Shared<T>>) {
    while shared.pause(shared.config.clock_tick()) {
        if let Err(err) = shared.with_node(|node, now| node.tick(now)) {
            error!(%err, "clock tick failed");
        }
    }
}

fn run_receiver<T: BundleTransport>(shared: Arc<Shared<T>>) {
    while !shared.is_stopped() {
        let handled = match shared.with_node(|node, now| node.poll_inbound(now)) {
            Ok(handled) => handled,
            Err(err) => {
                error!(%err, "inbound processing failed");
                0
            }
        };
        if handled == 0 && !shared.pause(shared.config.inbound_poll()) {
            break;
        }
    }
}
