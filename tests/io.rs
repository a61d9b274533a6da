//! End-to-end worker tests over real socket pairs.
//!
//! The Bluetooth link is played by a SOCK_SEQPACKET pair so packet
//! boundaries written by the encode loop are observable on the far end;
//! the PCM endpoint is a plain stream pair.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use proptest::prelude::*;

use bluepipe::codec::{aac, aptx, sbc, SbcCodec};
use bluepipe::{
    a2dp_sink_sbc, send_pcm, CodecAdapter, CodecId, CodecInit, CountingReporter, ExitStatus,
    Profile, Transport, TransportState, Worker,
};

const MTU_READ: usize = 475;

fn init_logging() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn sine(total_samples: usize, channels: usize, amplitude: f32) -> Vec<i16> {
    (0..total_samples)
        .map(|i| {
            let t = (i / channels) as f32 / 44100.0;
            (amplitude * f32::from(i16::MAX) * (2.0 * std::f32::consts::PI * 441.0 * t).sin())
                as i16
        })
        .collect()
}

fn pcm_to_bytes(pcm: &[i16]) -> Vec<u8> {
    pcm.iter().flat_map(|s| s.to_le_bytes()).collect()
}

fn seqpacket_pair() -> (OwnedFd, OwnedFd) {
    socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )
    .unwrap()
}

#[test]
fn setup_errors_are_reported_in_precondition_order() {
    init_logging();
    let mut transport =
        Transport::new(Profile::A2dpSink, CodecId::Sbc, vec![0xFF; 4]).unwrap();
    let sink = CountingReporter::new();

    // Unset socket is reported before the unset MTU.
    assert_eq!(a2dp_sink_sbc(&transport, &sink), ExitStatus::SetupFailed);
    assert_eq!(sink.errors(), 1);
    assert_eq!(sink.last_message(), "Invalid BT socket: -1");

    let (bt_local, _bt_remote) = UnixStream::pair().unwrap();
    transport.socket_fd = bt_local.as_raw_fd();
    assert_eq!(a2dp_sink_sbc(&transport, &sink), ExitStatus::SetupFailed);
    assert_eq!(sink.errors(), 2);
    assert_eq!(sink.last_message(), "Invalid reading MTU: 0");

    transport.mtu_read = MTU_READ;
    assert_eq!(a2dp_sink_sbc(&transport, &sink), ExitStatus::SetupFailed);
    assert_eq!(sink.errors(), 3);
    assert!(sink
        .last_message()
        .starts_with("Couldn't initialize SBC codec:"));

    // With a valid configuration the loop starts and parks on the socket;
    // a stop request ends it silently.
    transport.codec_config = sbc::config_44100_stereo(2, 53).to_vec();
    let stop = transport.stop_handle();
    std::thread::scope(|s| {
        let worker = s.spawn(|| a2dp_sink_sbc(&transport, &sink));
        std::thread::sleep(Duration::from_millis(50));
        stop.stop();
        assert_eq!(worker.join().unwrap(), ExitStatus::Cancelled);
    });
    assert_eq!(sink.errors(), 3);
    assert_eq!(sink.warnings(), 0);
}

#[test]
fn decode_worker_relays_frames_to_the_pcm_endpoint() {
    init_logging();
    let (bt_local, bt_remote) = UnixStream::pair().unwrap();
    let (pcm_local, mut pcm_remote) = UnixStream::pair().unwrap();

    let config = sbc::config_44100_stereo(2, 250);
    let mut transport =
        Transport::new(Profile::A2dpSink, CodecId::Sbc, config.to_vec()).unwrap();
    transport.socket_fd = bt_remote.as_raw_fd();
    transport.pcm_fd = pcm_local.as_raw_fd();
    transport.mtu_read = MTU_READ;
    transport.state = TransportState::Active;

    let reporter = Arc::new(CountingReporter::new());
    let worker = Worker::spawn_decode(transport, reporter.clone()).unwrap();

    let frame_samples = SbcCodec::init(&config).unwrap().frame_samples();
    let pcm = sine(frame_samples * 4, 2, 0.3);
    send_pcm(bt_local.as_raw_fd(), CodecId::Sbc, &config, &pcm, MTU_READ).unwrap();

    let mut relayed = vec![0u8; pcm.len() * 2];
    pcm_remote.read_exact(&mut relayed).unwrap();
    // Bitpool ceiling makes the round trip lossless.
    assert_eq!(relayed, pcm_to_bytes(&pcm));

    drop(bt_local);
    let (transport, status) = worker.join();
    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(transport.state, TransportState::Active);
    assert_eq!(reporter.warnings(), 0);
    assert_eq!(reporter.errors(), 0);
}

#[test]
fn decode_worker_stops_promptly_and_silently() {
    init_logging();
    let (_bt_local, bt_remote) = UnixStream::pair().unwrap();
    let config = sbc::config_44100_stereo(2, 53);
    let mut transport =
        Transport::new(Profile::A2dpSink, CodecId::Sbc, config.to_vec()).unwrap();
    transport.socket_fd = bt_remote.as_raw_fd();
    transport.pcm_fd = bt_remote.as_raw_fd();
    transport.mtu_read = MTU_READ;
    transport.state = TransportState::Active;

    let reporter = Arc::new(CountingReporter::new());
    let worker = Worker::spawn_decode(transport, reporter.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(30));

    let start = Instant::now();
    worker.stop();
    let (transport, status) = worker.join();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(status, ExitStatus::Cancelled);
    assert_eq!(transport.state, TransportState::Active);
    assert_eq!(reporter.warnings(), 0);
    assert_eq!(reporter.errors(), 0);
}

#[test]
fn decode_write_failure_aborts_the_transport() {
    init_logging();
    let (bt_local, bt_remote) = UnixStream::pair().unwrap();
    // Read-only descriptor: the first PCM write fails.
    let dev_null = File::open("/dev/null").unwrap();

    let config = sbc::config_44100_stereo(2, 53);
    let mut transport =
        Transport::new(Profile::A2dpSink, CodecId::Sbc, config.to_vec()).unwrap();
    transport.socket_fd = bt_remote.as_raw_fd();
    transport.pcm_fd = dev_null.as_raw_fd();
    transport.mtu_read = MTU_READ;
    transport.state = TransportState::Active;

    let reporter = Arc::new(CountingReporter::new());
    let worker = Worker::spawn_decode(transport, reporter.clone()).unwrap();

    let frame_samples = SbcCodec::init(&config).unwrap().frame_samples();
    let pcm = sine(frame_samples, 2, 0.3);
    send_pcm(bt_local.as_raw_fd(), CodecId::Sbc, &config, &pcm, MTU_READ).unwrap();

    let (transport, status) = worker.join();
    assert_eq!(status, ExitStatus::IoFailed);
    assert_eq!(transport.state, TransportState::Aborted);
    assert_eq!(reporter.warnings(), 1);
    assert!(reporter.last_message().starts_with("PCM write error:"));
}

/// Drive one encode worker to completion and collect the lengths of every
/// packet it put on the link.
fn run_encode(codec: CodecId, config: Vec<u8>, mtu_write: usize, frames: usize) -> Vec<usize> {
    init_logging();
    let (bt_local, bt_remote) = seqpacket_pair();
    let (mut pcm_writer, pcm_reader) = UnixStream::pair().unwrap();

    let frame_samples = bluepipe::build_adapter(codec, &config).unwrap().frame_samples();

    let mut transport = Transport::new(Profile::A2dpSource, codec, config).unwrap();
    transport.socket_fd = bt_local.as_raw_fd();
    transport.pcm_fd = pcm_reader.as_raw_fd();
    transport.mtu_write = mtu_write;
    transport.state = TransportState::Active;

    let reporter = Arc::new(CountingReporter::new());
    let worker = Worker::spawn_encode(transport, reporter.clone()).unwrap();

    // Drain the link while the worker runs: one frame can fan out into
    // more packets than the socket send buffer holds, so reading only
    // after the join would park the worker forever.
    let drain = std::thread::spawn(move || {
        let mut lengths = Vec::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match nix::unistd::read(bt_remote.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(n) => lengths.push(n),
                Err(e) => panic!("link read failed: {e}"),
            }
        }
        lengths
    });

    let pcm = sine(frame_samples * frames, 2, 0.3);
    pcm_writer.write_all(&pcm_to_bytes(&pcm)).unwrap();
    drop(pcm_writer);

    let (_, status) = worker.join();
    assert_eq!(status, ExitStatus::Clean);
    assert_eq!(reporter.warnings(), 0);
    assert_eq!(reporter.errors(), 0);

    drop(bt_local);
    drain.join().unwrap()
}

#[test]
fn sbc_encode_packets_fit_one_frame_per_packet() {
    let config = sbc::config_44100_stereo(2, 53).to_vec();
    let frame_len = SbcCodec::init(&config).unwrap().max_frame_len();
    let mtu_write = frame_len * 3;

    let lengths = run_encode(CodecId::Sbc, config, mtu_write, 12);
    assert_eq!(lengths.len(), 12);
    for len in lengths {
        assert_eq!(len, frame_len);
        assert!(len <= mtu_write);
    }
}

#[test]
fn aac_encode_fragments_frames_to_the_write_mtu() {
    let mtu_write = 64;
    let lengths = run_encode(
        CodecId::Aac,
        aac::config_44100_stereo(true, 165_000).to_vec(),
        mtu_write,
        4,
    );

    // Variable-bitrate frames exceed this MTU and must be fragmented.
    assert!(lengths.len() > 4, "expected fragmentation: {lengths:?}");
    for len in &lengths {
        assert!(*len <= mtu_write, "oversized packet: {lengths:?}");
    }
    assert!(lengths.iter().any(|len| *len == mtu_write));
}

#[test]
fn aptx_encode_respects_a_tight_write_mtu() {
    let mtu_write = 40;
    let frames = 8;
    let lengths = run_encode(
        CodecId::Aptx,
        aptx::config_44100_stereo().to_vec(),
        mtu_write,
        frames,
    );

    // Fixed 4:1 coding: total payload is exactly a quarter of the PCM.
    let adapter =
        bluepipe::build_adapter(CodecId::Aptx, &aptx::config_44100_stereo()).unwrap();
    let total: usize = lengths.iter().sum();
    assert_eq!(total, adapter.max_frame_len() * frames);
    for len in lengths {
        assert!(len <= mtu_write);
    }
}

#[test]
fn encode_worker_stops_while_parked_on_pcm() {
    init_logging();
    let (bt_local, _bt_remote) = seqpacket_pair();
    let (_pcm_writer, pcm_reader) = UnixStream::pair().unwrap();

    let mut transport = Transport::new(
        Profile::A2dpSource,
        CodecId::Aptx,
        aptx::config_44100_stereo().to_vec(),
    )
    .unwrap();
    transport.socket_fd = bt_local.as_raw_fd();
    transport.pcm_fd = pcm_reader.as_raw_fd();
    transport.mtu_write = 40;
    transport.state = TransportState::Active;

    let reporter = Arc::new(CountingReporter::new());
    let worker = Worker::spawn_encode(transport, reporter.clone()).unwrap();
    std::thread::sleep(Duration::from_millis(30));

    let start = Instant::now();
    worker.stop();
    let (_, status) = worker.join();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(status, ExitStatus::Cancelled);
    assert_eq!(reporter.warnings(), 0);
    assert_eq!(reporter.errors(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every encoded frame stays within the advertised bound and decodes
    /// back in full, across the whole bitpool range and arbitrary PCM.
    #[test]
    fn sbc_frames_honor_the_length_bound(
        samples in proptest::collection::vec(any::<i16>(), 256),
        bitpool in 2u8..=250,
    ) {
        let config = sbc::config_44100_stereo(2, bitpool);
        let mut codec = SbcCodec::init(&config).unwrap();

        let frame = codec.encode(&samples).unwrap();
        prop_assert_eq!(frame.len(), codec.max_frame_len());

        let out = codec.decode(&frame).unwrap();
        prop_assert_eq!(out.consumed, frame.len());
        prop_assert_eq!(out.pcm.len(), samples.len());
    }
}
