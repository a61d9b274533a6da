//! Bluetooth audio transport IO engine.
//!
//! Per-connection worker loops that relay audio between a Bluetooth link
//! socket and a PCM endpoint through a pluggable codec layer:
//!
//! ```text
//!   decode:  BT socket --read--> [FrameBuffer] --codec--> PCM endpoint
//!   encode:  PCM endpoint --read--> [Pacer] --codec--> BT socket
//! ```
//!
//! The control plane builds a [`Transport`], fills in the negotiated
//! descriptors and MTUs, and hands it to a [`Worker`] (or calls one of the
//! `a2dp_*` entry points on a thread of its own). Workers borrow the
//! descriptors, never close them, report failures through a [`Reporter`],
//! and stop cooperatively via the transport's [`StopSignal`].

pub mod buffer;
pub mod codec;
pub mod diag;
pub mod error;
pub mod io;
pub mod transport;

pub use buffer::FrameBuffer;
pub use codec::{build_adapter, CodecAdapter, CodecInit, DecodeOutput};
pub use diag::{CountingReporter, LogReporter, Reporter, Severity};
pub use error::{CodecError, Error, MtuDirection, Result, SetupError};
pub use io::{
    a2dp_sink_aac, a2dp_sink_aptx, a2dp_sink_sbc, a2dp_source_aac, a2dp_source_aptx,
    a2dp_source_sbc, send_pcm, ExitStatus, Worker,
};
pub use transport::{CodecId, Profile, StopSignal, Transport, TransportState};
