//! IO thread engine
//!
//! One worker per active transport, no sub-concurrency, no locks on the
//! audio path. The decode loop moves compressed frames from the Bluetooth
//! socket to the PCM endpoint; the encode loop moves PCM the other way
//! under real-time pacing. Both loops are written once and parametrized
//! over the codec adapter; the per-codec entry points are thin wrappers
//! suitable as thread start routines.
//!
//! Loop lifecycle: validate the transport, construct the codec adapter
//! from the negotiated configuration, then run until cancellation, peer
//! closure, or a fatal error. Setup failures are reported exactly once
//! and the loop never starts running; cancellation is always silent.

mod fd;
pub mod pacing;

use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::buffer::FrameBuffer;
use crate::codec::{self, build_adapter, AacCodec, AptxCodec, CodecInit, SbcCodec};
use crate::diag::{Reporter, Severity};
use crate::error::{MtuDirection, Result, SetupError};
use crate::io::fd::{ExactOutcome, ReadOutcome, WriteOutcome};
use crate::io::pacing::{PaceOutcome, Pacer};
use crate::transport::{CodecId, StopSignal, Transport, TransportState};

/// Final status of one worker run.
///
/// The control plane uses this to decide whether the transport should be
/// marked aborted; everything else about the failure stays local to the
/// worker and its diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Orderly exit: peer closed the stream.
    Clean,
    /// Stop was requested; nothing reported.
    Cancelled,
    /// Validation or codec construction failed; reported once.
    SetupFailed,
    /// Unrecoverable runtime failure; reported once.
    IoFailed,
}

fn report_setup(reporter: &dyn Reporter, err: &SetupError) -> ExitStatus {
    reporter.report(Severity::Error, &err.to_string());
    ExitStatus::SetupFailed
}

/// Bluetooth socket to PCM endpoint.
fn decode_loop<C: CodecInit>(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    if let Err(err) = transport.validate_for_decode() {
        return report_setup(reporter, &err);
    }
    let mut codec = match C::init(&transport.codec_config) {
        Ok(codec) => codec,
        Err(source) => {
            return report_setup(
                reporter,
                &SetupError::CodecInit {
                    codec: C::NAME,
                    source,
                },
            )
        }
    };

    let stop = transport.stop_handle();
    let mut window = FrameBuffer::with_capacity(transport.mtu_read * 2);
    let mut chunk = vec![0u8; transport.mtu_read];

    loop {
        match fd::read_interruptible(transport.socket_fd, &stop, &mut chunk) {
            Ok(ReadOutcome::Data(n)) => window.append(&chunk[..n]),
            Ok(ReadOutcome::Closed) => return ExitStatus::Clean,
            Ok(ReadOutcome::Cancelled) => return ExitStatus::Cancelled,
            Err(err) => {
                reporter.report(Severity::Warning, &format!("BT socket read error: {err}"));
                return ExitStatus::IoFailed;
            }
        }

        let out = match codec.decode(window.as_slice()) {
            Ok(out) => out,
            Err(err) => {
                reporter.report(Severity::Error, &format!("Decoder failure: {err}"));
                return ExitStatus::IoFailed;
            }
        };
        window.consume(out.consumed);
        if out.pcm.is_empty() {
            continue;
        }

        let bytes = codec::samples_to_bytes(&out.pcm);
        match fd::write_all_interruptible(transport.pcm_fd, &stop, &bytes) {
            Ok(WriteOutcome::Done) => {}
            Ok(WriteOutcome::Closed) => return ExitStatus::Clean,
            Ok(WriteOutcome::Cancelled) => return ExitStatus::Cancelled,
            Err(err) => {
                reporter.report(Severity::Warning, &format!("PCM write error: {err}"));
                return ExitStatus::IoFailed;
            }
        }
    }
}

/// PCM endpoint to Bluetooth socket, paced to the codec frame duration.
fn encode_loop<C: CodecInit>(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    if let Err(err) = transport.validate_for_encode() {
        return report_setup(reporter, &err);
    }
    let mut codec = match C::init(&transport.codec_config) {
        Ok(codec) => codec,
        Err(source) => {
            return report_setup(
                reporter,
                &SetupError::CodecInit {
                    codec: C::NAME,
                    source,
                },
            )
        }
    };

    let stop = transport.stop_handle();
    let mut pcm_bytes = vec![0u8; codec.frame_samples() * 2];
    let mut pacer = Pacer::new(codec.frame_duration());

    loop {
        match fd::read_exact_interruptible(transport.pcm_fd, &stop, &mut pcm_bytes) {
            Ok(ExactOutcome::Filled) => {}
            Ok(ExactOutcome::Closed) => return ExitStatus::Clean,
            Ok(ExactOutcome::Cancelled) => return ExitStatus::Cancelled,
            Err(err) => {
                reporter.report(Severity::Warning, &format!("PCM read error: {err}"));
                return ExitStatus::IoFailed;
            }
        }

        // Throttle before encoding so the socket sees frames at playback
        // rate even when the PCM side is buffered far ahead.
        if pacer.wait(&stop) == PaceOutcome::Cancelled {
            return ExitStatus::Cancelled;
        }

        let samples = codec::bytes_to_samples(&pcm_bytes);
        let encoded = match codec.encode(&samples) {
            Ok(encoded) => encoded,
            Err(err) => {
                reporter.report(Severity::Error, &format!("Encoder failure: {err}"));
                return ExitStatus::IoFailed;
            }
        };

        for packet in encoded.chunks(transport.mtu_write) {
            match fd::write_all_interruptible(transport.socket_fd, &stop, packet) {
                Ok(WriteOutcome::Done) => {}
                Ok(WriteOutcome::Closed) => return ExitStatus::Clean,
                Ok(WriteOutcome::Cancelled) => return ExitStatus::Cancelled,
                Err(err) => {
                    reporter
                        .report(Severity::Warning, &format!("BT socket write error: {err}"));
                    return ExitStatus::IoFailed;
                }
            }
        }
    }
}

/// Decode loop entry for the fixed-rate codec.
pub fn a2dp_sink_sbc(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    decode_loop::<SbcCodec>(transport, reporter)
}

/// Encode loop entry for the fixed-rate codec.
pub fn a2dp_source_sbc(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    encode_loop::<SbcCodec>(transport, reporter)
}

/// Decode loop entry for the variable-bitrate codec.
pub fn a2dp_sink_aac(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    decode_loop::<AacCodec>(transport, reporter)
}

/// Encode loop entry for the variable-bitrate codec.
pub fn a2dp_source_aac(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    encode_loop::<AacCodec>(transport, reporter)
}

/// Decode loop entry for the vendor codec.
pub fn a2dp_sink_aptx(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    decode_loop::<AptxCodec>(transport, reporter)
}

/// Encode loop entry for the vendor codec.
pub fn a2dp_source_aptx(transport: &Transport, reporter: &dyn Reporter) -> ExitStatus {
    encode_loop::<AptxCodec>(transport, reporter)
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Decode,
    Encode,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Decode => "decode",
            Direction::Encode => "encode",
        }
    }
}

/// Owned worker thread for one transport.
///
/// The transport is moved into the thread at spawn and handed back from
/// [`join`](Worker::join); while the worker runs, the control plane holds
/// only this handle and the stop signal inside it.
pub struct Worker {
    handle: JoinHandle<(Transport, ExitStatus)>,
    stop: StopSignal,
}

impl Worker {
    pub fn spawn_decode(
        transport: Transport,
        reporter: Arc<dyn Reporter>,
    ) -> std::io::Result<Self> {
        Self::spawn(transport, reporter, Direction::Decode)
    }

    pub fn spawn_encode(
        transport: Transport,
        reporter: Arc<dyn Reporter>,
    ) -> std::io::Result<Self> {
        Self::spawn(transport, reporter, Direction::Encode)
    }

    fn spawn(
        transport: Transport,
        reporter: Arc<dyn Reporter>,
        direction: Direction,
    ) -> std::io::Result<Self> {
        let stop = transport.stop_handle();
        let name = format!("io-{}-{}", transport.codec, direction.label());
        let handle = thread::Builder::new().name(name).spawn(move || {
            let status = match (direction, transport.codec) {
                (Direction::Decode, CodecId::Sbc) => a2dp_sink_sbc(&transport, reporter.as_ref()),
                (Direction::Decode, CodecId::Aac) => a2dp_sink_aac(&transport, reporter.as_ref()),
                (Direction::Decode, CodecId::Aptx) => {
                    a2dp_sink_aptx(&transport, reporter.as_ref())
                }
                (Direction::Encode, CodecId::Sbc) => {
                    a2dp_source_sbc(&transport, reporter.as_ref())
                }
                (Direction::Encode, CodecId::Aac) => {
                    a2dp_source_aac(&transport, reporter.as_ref())
                }
                (Direction::Encode, CodecId::Aptx) => {
                    a2dp_source_aptx(&transport, reporter.as_ref())
                }
            };
            (transport, status)
        })?;
        Ok(Self { handle, stop })
    }

    /// Request a stop at the worker's next suspension point.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the worker and take the transport back, marking it
    /// aborted after a failed run.
    pub fn join(self) -> (Transport, ExitStatus) {
        match self.handle.join() {
            Ok((mut transport, status)) => {
                if matches!(status, ExitStatus::SetupFailed | ExitStatus::IoFailed) {
                    transport.state = TransportState::Aborted;
                }
                (transport, status)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Encode a whole PCM buffer and transmit it as MTU-bounded packets.
///
/// One-shot producer path: no worker, no pacing. The tail frame is
/// zero-padded to the codec frame size.
pub fn send_pcm(
    socket_fd: RawFd,
    codec: CodecId,
    config: &[u8],
    pcm: &[i16],
    mtu: usize,
) -> Result<()> {
    if mtu == 0 {
        return Err(SetupError::InvalidMtu {
            direction: MtuDirection::Write,
            value: mtu,
        }
        .into());
    }
    let mut adapter = build_adapter(codec, config)?;
    let frame_samples = adapter.frame_samples();
    let mut scratch = vec![0i16; frame_samples];

    for chunk in pcm.chunks(frame_samples) {
        let frame: &[i16] = if chunk.len() == frame_samples {
            chunk
        } else {
            scratch[..chunk.len()].copy_from_slice(chunk);
            scratch[chunk.len()..].fill(0);
            &scratch
        };
        let encoded = adapter.encode(frame)?;
        for packet in encoded.chunks(mtu) {
            fd::write_all(socket_fd, packet)?;
        }
    }
    Ok(())
}
