//! Transport descriptor and cooperative stop signalling
//!
//! A [`Transport`] describes one negotiated Bluetooth audio connection:
//! profile, codec, the negotiated codec configuration blob, the link and
//! PCM descriptors, and the per-direction MTUs. The control plane owns the
//! transport before a worker starts and again after the worker is joined;
//! while the worker runs, the only shared state is the [`StopSignal`].
//!
//! Descriptor ownership is half-duplex by contract: both descriptors are
//! borrowed by the worker and are never closed by this crate.

use std::os::fd::{AsFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::error::{MtuDirection, SetupError};

/// Bluetooth audio profile of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    A2dpSource,
    A2dpSink,
    Hfp,
    Hsp,
}

/// Negotiated codec of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    Sbc,
    Aac,
    Aptx,
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::Sbc => write!(f, "SBC"),
            CodecId::Aac => write!(f, "AAC"),
            CodecId::Aptx => write!(f, "aptX"),
        }
    }
}

/// Transport lifecycle state, driven by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Pending,
    Active,
    Aborted,
}

/// Cloneable cooperative cancellation handle.
///
/// Raising the signal sets a flag and arms an eventfd, so a worker parked
/// in `poll(2)` on a descriptor wakes immediately. Workers observe the
/// signal only at their blocking suspension points; a codec encode or
/// decode call in progress always runs to completion.
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug)]
struct StopInner {
    stopped: AtomicBool,
    event: EventFd,
}

impl StopSignal {
    pub fn new() -> std::io::Result<Self> {
        let event = EventFd::from_value_and_flags(
            0,
            EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK,
        )?;
        Ok(Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                event,
            }),
        })
    }

    /// Request the worker to stop at its next suspension point.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        // Wakes any poll currently parked on the event descriptor. The
        // counter write cannot block on a non-blocking eventfd.
        let _ = self.inner.event.arm();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Event descriptor to include in poll sets alongside the data fd.
    pub(crate) fn event_fd(&self) -> BorrowedFd<'_> {
        self.inner.event.as_fd()
    }
}

/// One active Bluetooth audio connection.
///
/// The control plane fills in the descriptor and MTU fields after link
/// negotiation and flips `state` to [`TransportState::Active`] before
/// starting a worker.
#[derive(Debug)]
pub struct Transport {
    pub profile: Profile,
    pub codec: CodecId,
    pub state: TransportState,

    /// Bluetooth link descriptor, borrowed from the control plane.
    pub socket_fd: RawFd,
    /// PCM endpoint descriptor, borrowed from the control plane.
    pub pcm_fd: RawFd,

    pub mtu_read: usize,
    pub mtu_write: usize,

    /// Codec-specific negotiated configuration blob, validated at
    /// adapter construction.
    pub codec_config: Vec<u8>,

    stop: StopSignal,
}

impl Transport {
    /// Create a transport with unset descriptors and MTUs.
    pub fn new(
        profile: Profile,
        codec: CodecId,
        codec_config: Vec<u8>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            profile,
            codec,
            state: TransportState::Idle,
            socket_fd: -1,
            pcm_fd: -1,
            mtu_read: 0,
            mtu_write: 0,
            codec_config,
            stop: StopSignal::new()?,
        })
    }

    /// Handle the control plane keeps to request a stop while a worker
    /// owns the transport.
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Readiness check for the decode direction. The socket is checked
    /// before the MTU so the first reported diagnostic names the first
    /// violated precondition.
    pub fn validate_for_decode(&self) -> Result<(), SetupError> {
        if self.socket_fd < 0 {
            return Err(SetupError::InvalidSocket(self.socket_fd));
        }
        if self.mtu_read == 0 {
            return Err(SetupError::InvalidMtu {
                direction: MtuDirection::Read,
                value: self.mtu_read,
            });
        }
        Ok(())
    }

    /// Readiness check for the encode direction.
    pub fn validate_for_encode(&self) -> Result<(), SetupError> {
        if self.socket_fd < 0 {
            return Err(SetupError::InvalidSocket(self.socket_fd));
        }
        if self.mtu_write == 0 {
            return Err(SetupError::InvalidMtu {
                direction: MtuDirection::Write,
                value: self.mtu_write,
            });
        }
        Ok(())
    }
}
