#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::thread::{self, ThreadId};

use mif_stream::{
    BitIndex, Direction, Doorbell, IrqHandler, Link, LinkConfig, PendingSignals, StreamChannel,
    StreamParams, SubsystemLayout, Target,
};
use spinning_top::Spinlock;

/// Doorbell that remembers every bit it was asked to set.
#[derive(Default)]
pub struct RecordingDoorbell {
    kicks: Spinlock<Vec<(BitIndex, Target)>>,
}

impl RecordingDoorbell {
    pub fn kicks(&self) -> Vec<(BitIndex, Target)> {
        self.kicks.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.kicks.lock().len()
    }

    pub fn clear(&self) {
        self.kicks.lock().clear();
    }
}

impl Doorbell for RecordingDoorbell {
    fn irq_bit_set(&self, bit: BitIndex, target: Target) {
        self.kicks.lock().push((bit, target));
    }
}

/// Logger that keeps records per test thread.
struct CaptureLogger {
    records: Spinlock<Vec<(ThreadId, log::Level, String)>>,
}

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            self.records.lock().push((
                thread::current().id(),
                record.level(),
                format!("{}", record.args()),
            ));
        }
    }

    fn flush(&self) {
        // nothing
    }
}

static LOGGER: CaptureLogger = CaptureLogger {
    records: Spinlock::new(Vec::new()),
};
static LOGGER_INIT: Once = Once::new();

pub fn init_logging() {
    LOGGER_INIT.call_once(|| {
        log::set_logger(&LOGGER).expect("logger already set");
        log::set_max_level(log::LevelFilter::Trace);
    });
}

/// Messages logged at exactly `level` by the current thread.
pub fn logged(level: log::Level) -> Vec<String> {
    let me = thread::current().id();
    LOGGER
        .records
        .lock()
        .iter()
        .filter(|(id, lvl, _)| *id == me && *lvl == level)
        .map(|(_, _, msg)| msg.clone())
        .collect()
}

pub struct Fixture {
    pub link: Arc<Link>,
    pub doorbell: Arc<RecordingDoorbell>,
    pub signals: Arc<PendingSignals>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(LinkConfig::default().with_layout(SubsystemLayout::Combined))
    }

    pub fn with_config(config: LinkConfig) -> Self {
        init_logging();
        let doorbell = Arc::new(RecordingDoorbell::default());
        let link = Link::new(config, doorbell.clone()).expect("link");
        Self {
            link,
            doorbell,
            signals: Arc::new(PendingSignals::new()),
        }
    }

    pub fn handler(&self) -> Arc<dyn IrqHandler> {
        self.signals.clone()
    }

    pub fn open(&self, direction: Direction, count: u32, size: u32) -> StreamChannel {
        StreamChannel::open(
            &self.link,
            StreamParams::new(direction, Target::Wlan, count, size),
            self.handler(),
        )
        .expect("open")
    }

    /// Free bit counts and free shared memory, for leak checks.
    pub fn snapshot(&self, target: Target) -> (usize, usize, usize) {
        let bits = self.link.intrbit(target);
        (
            bits.free_toward_host_count(),
            bits.free_toward_remote_count(target),
            self.link.shared_memory().available(),
        )
    }
}
