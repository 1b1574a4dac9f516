//! One-directional packet stream over a [`Link`].
//!
//! A stream owns a packet ring in shared memory and two doorbell bits:
//!
//! - a **toward-host** bit, which the firmware asserts and the host receives
//!   through the handler passed to [`StreamChannel::open`];
//! - a **toward-remote** bit, which the host asserts through the link's
//!   [`Doorbell`](crate::Doorbell).
//!
//! Which of the two is the *write-available* signal (kicked by the producer
//! after publishing a packet) and which is the *read-completion* signal
//! (kicked by the consumer after freeing slots) depends on the direction:
//!
//! | direction          | write-available | read-completion |
//! |--------------------|-----------------|-----------------|
//! | `InboundToHost`    | toward-host     | toward-remote   |
//! | `OutboundFromHost` | toward-remote   | toward-host     |
//!
//! Every successful write kicks the write-available bit and every read that
//! consumed something kicks the read-completion bit, on the stream's target.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::{Ordering, fence};

use intr_bits::{IntrBits, IrqHandler};
use log::{debug, error, trace, warn};
use mif_abi::{
    BitIndex, Direction, POISON_BYTE, RESERVED_PANIC_WLAN, StreamConf, Target,
};
use packet_buffer::{PacketBuffer, PacketHandle};
use zerocopy::IntoBytes;

use crate::error::StreamError;
use crate::link::Link;

/// How the toward-remote bit of a stream is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalKind {
    /// Allocate a free bit.
    #[default]
    Dynamic,
    /// Use the target's reserved panic bit. Used by the channel that forces
    /// firmware panics.
    Reserved,
}

/// Parameters for [`StreamChannel::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub direction: Direction,
    pub target: Target,
    pub packet_count: u32,
    pub packet_size: u32,
    pub signal: SignalKind,
}

impl StreamParams {
    pub fn new(direction: Direction, target: Target, packet_count: u32, packet_size: u32) -> Self {
        Self {
            direction,
            target,
            packet_count,
            packet_size,
            signal: SignalKind::Dynamic,
        }
    }

    /// Build parameters from raw direction and target values.
    pub fn from_raw(
        direction: u32,
        target: u32,
        packet_count: u32,
        packet_size: u32,
        signal: SignalKind,
    ) -> Result<Self, StreamError> {
        let Some(direction) = Direction::from_u32(direction) else {
            error!("mif stream: invalid direction {}", direction);
            return Err(StreamError::InvalidArgument);
        };
        let Some(target) = Target::from_u32(target) else {
            error!("mif stream: invalid target {}", target);
            return Err(StreamError::InvalidArgument);
        };
        Ok(Self {
            direction,
            target,
            packet_count,
            packet_size,
            signal,
        })
    }

    pub fn with_signal(mut self, signal: SignalKind) -> Self {
        self.signal = signal;
        self
    }
}

/// Reserved toward-remote bit for `target`.
fn reserved_bit(target: Target) -> BitIndex {
    // Firmware only watches the WLAN panic bit, whatever the target.
    match target {
        Target::Wlan => RESERVED_PANIC_WLAN,
        Target::Wpan => RESERVED_PANIC_WLAN,
        Target::Fxm1 => RESERVED_PANIC_WLAN,
        Target::Fxm2 => RESERVED_PANIC_WLAN,
    }
}

/// Namespace a bit was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitSource {
    TowardHost,
    TowardRemote,
    /// Never allocated, so never freed.
    Reserved,
}

/// A doorbell bit held by a stream. Consumed when freed.
#[derive(Debug)]
struct OwnedBit {
    index: BitIndex,
    source: BitSource,
}

impl OwnedBit {
    fn free(self, intrbits: &IntrBits, target: Target) {
        let result = match self.source {
            BitSource::TowardHost => intrbits.free_toward_host(self.index),
            BitSource::TowardRemote => intrbits.free_toward_remote(self.index, target),
            BitSource::Reserved => return,
        };
        if let Err(err) = result {
            error!(
                "mif stream: failed to free {:?} bit {} for {:?}: {}",
                self.source, self.index, target, err
            );
        }
    }
}

/// The two bits of a stream and the roles they play.
struct Signals {
    direction: Direction,
    toward_host: OwnedBit,
    toward_remote: OwnedBit,
}

impl Signals {
    fn read_completion(&self) -> &OwnedBit {
        match self.direction {
            Direction::InboundToHost => &self.toward_remote,
            Direction::OutboundFromHost => &self.toward_host,
        }
    }

    fn write_available(&self) -> &OwnedBit {
        match self.direction {
            Direction::InboundToHost => &self.toward_host,
            Direction::OutboundFromHost => &self.toward_remote,
        }
    }
}

struct Opened {
    link: Weak<Link>,
    buffer: PacketBuffer,
    signals: Signals,
}

impl Opened {
    fn link(&self) -> Result<Arc<Link>, StreamError> {
        self.link.upgrade().ok_or(StreamError::Unavailable)
    }
}

/// One direction of packet flow between the host and a firmware core.
///
/// Dropping the channel closes it.
pub struct StreamChannel {
    direction: Direction,
    target: Target,
    state: Option<Opened>,
}

impl Default for StreamChannel {
    /// A channel that was never opened. Closing it does nothing.
    ///
    /// [`direction`](StreamChannel::direction) and
    /// [`target`](StreamChannel::target) report `InboundToHost` and `Wlan`
    /// as placeholders; check [`is_open`](StreamChannel::is_open) first.
    fn default() -> Self {
        Self {
            direction: Direction::InboundToHost,
            target: Target::Wlan,
            state: None,
        }
    }
}

impl StreamChannel {
    /// Open a stream on `link`.
    ///
    /// `handler` receives toward-host interrupts on the stream's toward-host
    /// bit. On failure everything acquired so far is released again.
    pub fn open(
        link: &Arc<Link>,
        params: StreamParams,
        handler: Arc<dyn IrqHandler>,
    ) -> Result<Self, StreamError> {
        let StreamParams {
            direction,
            target,
            packet_count,
            packet_size,
            signal,
        } = params;

        let mut buffer = PacketBuffer::init(packet_count, packet_size, link.shared_memory())
            .inspect_err(|err| {
                debug!(
                    "mif stream: no buffer for {} x {} bytes: {}",
                    packet_count, packet_size, err
                )
            })?;

        let intrbits = link.intrbit(target);

        let toward_host = match intrbits.alloc_toward_host(handler) {
            Ok(index) => OwnedBit {
                index,
                source: BitSource::TowardHost,
            },
            Err(err) => {
                debug!("mif stream: no toward-host bit for {:?}: {}", target, err);
                buffer.release();
                return Err(err.into());
            }
        };

        let toward_remote = match signal {
            SignalKind::Reserved => OwnedBit {
                index: reserved_bit(target),
                source: BitSource::Reserved,
            },
            SignalKind::Dynamic => match intrbits.alloc_toward_remote(target) {
                Ok(index) => OwnedBit {
                    index,
                    source: BitSource::TowardRemote,
                },
                Err(err) => {
                    debug!("mif stream: no toward-remote bit for {:?}: {}", target, err);
                    toward_host.free(intrbits, target);
                    buffer.release();
                    return Err(err.into());
                }
            },
        };

        if direction == Direction::InboundToHost {
            buffer.poison(POISON_BYTE);
            // Firmware must observe the poisoned slots before it learns where they are.
            fence(Ordering::SeqCst);
        }

        let signals = Signals {
            direction,
            toward_host,
            toward_remote,
        };

        debug!(
            "mif stream: opened {:?} to {:?}, {} x {} bytes, read bit {} write bit {}",
            direction,
            target,
            packet_count,
            packet_size,
            signals.read_completion().index,
            signals.write_available().index
        );

        Ok(Self {
            direction,
            target,
            state: Some(Opened {
                link: Arc::downgrade(link),
                buffer,
                signals,
            }),
        })
    }

    /// Release both bits and the buffer. Does nothing if already closed.
    pub fn close(&mut self) {
        let Some(Opened {
            link,
            buffer,
            signals,
        }) = self.state.take()
        else {
            return;
        };

        let Signals {
            toward_host,
            toward_remote,
            ..
        } = signals;

        match link.upgrade() {
            Some(link) => {
                let intrbits = link.intrbit(self.target);
                toward_remote.free(intrbits, self.target);
                toward_host.free(intrbits, self.target);
            }
            None => error!(
                "mif stream: link gone, toward-host bit {} and toward-remote bit {} for {:?} not returned",
                toward_host.index, toward_remote.index, self.target
            ),
        }

        buffer.release();
        debug!("mif stream: closed {:?} to {:?}", self.direction, self.target);
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Direction the channel was opened with. Kept after close.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Target the channel was opened with. Kept after close.
    pub fn target(&self) -> Target {
        self.target
    }

    /// Write one packet and kick the write-available bit.
    pub fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.write_gather(&[data])
    }

    /// Write the concatenation of `fragments` as one packet and kick the
    /// write-available bit.
    pub fn write_gather(&mut self, fragments: &[&[u8]]) -> Result<(), StreamError> {
        let target = self.target;
        let opened = self.state.as_mut().ok_or(StreamError::Unavailable)?;
        let link = opened.link()?;

        opened.buffer.write_gather(fragments)?;
        kick(&link, opened.signals.write_available(), target);
        Ok(())
    }

    /// Copy the oldest packet into `out`, truncating it if `out` is short.
    ///
    /// Returns the number of bytes copied, 0 if there was nothing to read.
    /// Kicks the read-completion bit whenever a slot was consumed, including
    /// a slot the firmware published with a zero length.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize, StreamError> {
        let target = self.target;
        let opened = self.state.as_mut().ok_or(StreamError::Unavailable)?;
        let link = opened.link()?;

        let Some(n) = opened.buffer.read_packet(out) else {
            return Ok(0);
        };
        if n == 0 {
            warn!("mif stream: dropped zero-length packet from {:?}", target);
        }
        kick(&link, opened.signals.read_completion(), target);
        Ok(n)
    }

    /// The unread packet after `prev`, or the oldest one if `prev` is `None`.
    pub fn peek(&self, prev: Option<PacketHandle>) -> Option<PacketHandle> {
        self.state.as_ref()?.buffer.peek(prev)
    }

    /// Contents of a peeked packet, in place.
    pub fn payload(&self, handle: PacketHandle) -> Option<&[u8]> {
        self.state.as_ref()?.buffer.payload(handle)
    }

    /// Consume every packet up to and including `handle` and kick the
    /// read-completion bit once.
    pub fn peek_complete(&mut self, handle: PacketHandle) -> Result<(), StreamError> {
        let target = self.target;
        let opened = self.state.as_mut().ok_or(StreamError::Unavailable)?;
        let link = opened.link()?;

        if opened.buffer.peek_complete(handle) == 0 {
            return Err(StreamError::InvalidArgument);
        }
        kick(&link, opened.signals.read_completion(), target);
        Ok(())
    }

    /// Slot size of the stream's buffer.
    pub fn block_size(&self) -> Option<u32> {
        Some(self.state.as_ref()?.buffer.slot_size())
    }

    pub fn read_signal_index(&self) -> Option<BitIndex> {
        Some(self.state.as_ref()?.signals.read_completion().index)
    }

    pub fn write_signal_index(&self) -> Option<BitIndex> {
        Some(self.state.as_ref()?.signals.write_available().index)
    }

    /// Description of the stream for the firmware.
    pub fn config(&self) -> Option<StreamConf> {
        let opened = self.state.as_ref()?;
        Some(StreamConf {
            buf_conf: opened.buffer.config(),
            read_bit_idx: opened.signals.read_completion().index,
            write_bit_idx: opened.signals.write_available().index,
            _reserved: [0; 2],
        })
    }

    /// Write [`config`](Self::config) into `out` in the firmware's layout.
    ///
    /// Returns the number of bytes written.
    pub fn serialize_config(&self, out: &mut [u8]) -> Result<usize, StreamError> {
        let conf = self.config().ok_or(StreamError::Unavailable)?;
        conf.write_to_prefix(out)
            .map_err(|_| StreamError::InvalidArgument)?;
        Ok(conf.as_bytes().len())
    }

    /// Dump the stream's state at `level`.
    pub fn log(&self, level: log::Level) {
        match &self.state {
            Some(opened) => {
                log::log!(
                    level,
                    "mif stream {:?} to {:?}: read bit {} write bit {}",
                    self.direction,
                    self.target,
                    opened.signals.read_completion().index,
                    opened.signals.write_available().index
                );
                opened.buffer.log(level);
            }
            None => log::log!(
                level,
                "mif stream {:?} to {:?}: closed",
                self.direction,
                self.target
            ),
        }
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn kick(link: &Link, bit: &OwnedBit, target: Target) {
    trace!("mif stream: kick bit {} on {:?}", bit.index, target);
    link.doorbell().irq_bit_set(bit.index, target);
}
