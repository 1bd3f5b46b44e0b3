//! End-to-end encoder sessions.

use penc::prelude::*;
use penc::{edge, stage, PoolConfig};
use pretty_assertions::assert_eq;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

fn frame(pts: i64) -> Frame {
    let mut frame = Frame::new(WIDTH, HEIGHT, PixelFormat::Gray8);
    let stride = frame.stride(0);
    let luma = frame.plane_mut(0).unwrap();
    for y in 0..HEIGHT as usize {
        for x in 0..WIDTH as usize {
            luma[y * stride + x] = ((x * 3 + y + pts as usize * 5) % 251) as u8;
        }
    }
    frame.pts = pts * 40;
    frame
}

/// Submit `count` frames and collect every packet until end of stream.
fn encode(encoder: &Encoder, count: i64) -> Vec<EncodedPacket> {
    std::thread::scope(|scope| {
        let receiver = scope.spawn(|| {
            let mut packets = Vec::new();
            while let Some(packet) = encoder.receive_packet().unwrap() {
                packets.push(packet);
            }
            packets
        });

        for pts in 0..count {
            encoder.submit_frame(&frame(pts)).unwrap();
        }
        encoder.send_eos().unwrap();
        receiver.join().unwrap()
    })
}

#[test]
fn test_packets_arrive_in_picture_order() {
    let config = EncoderConfig::new(WIDTH, HEIGHT)
        .pixel_format(PixelFormat::Gray8)
        .intra_period(8)
        .workers(3);
    let encoder = Encoder::open(config).unwrap();
    let packets = encode(&encoder, 40);

    assert_eq!(packets.len(), 41);
    for (n, packet) in packets[..40].iter().enumerate() {
        assert_eq!(packet.picture_number, n as u64);
        assert_eq!(packet.pts, n as i64 * 40);
        assert!(!packet.end_of_stream);
        let expected = if n % 8 == 0 { SliceType::I } else { SliceType::P };
        assert_eq!(packet.slice_type, expected);

        let (header, levels) = packet.parse().unwrap();
        assert_eq!(header.picture_number, n as u64);
        assert_eq!(header.qp, packet.qp);
        assert_eq!(levels.len(), (WIDTH / 8 * HEIGHT / 8) as usize);
    }

    let eos = &packets[40];
    assert!(eos.end_of_stream);
    assert_eq!(eos.picture_number, 40);
    assert!(encoder.receive_packet().unwrap().is_none());

    let stats = encoder.stats();
    assert_eq!(stats.frames_submitted, 40);
    assert_eq!(stats.packets_received, 40);
    encoder.drain_and_close().unwrap();
}

#[test]
fn test_worker_counts_do_not_change_output() {
    let single = Encoder::open(EncoderConfig::new(WIDTH, HEIGHT).pixel_format(PixelFormat::Gray8).workers(1)).unwrap();
    let parallel = Encoder::open(EncoderConfig::new(WIDTH, HEIGHT).pixel_format(PixelFormat::Gray8).workers(4)).unwrap();

    let a = encode(&single, 12);
    let b = encode(&parallel, 12);
    assert_eq!(a, b);

    single.drain_and_close().unwrap();
    parallel.drain_and_close().unwrap();
}

#[test]
fn test_scalar_kernels_match_detected() {
    let base = EncoderConfig::new(WIDTH, HEIGHT).pixel_format(PixelFormat::Gray8).workers(2);
    let detected = Encoder::open(base.clone()).unwrap();
    let scalar = Encoder::open(base.kernels(KernelSelection::Scalar)).unwrap();

    assert_eq!(encode(&detected, 6), encode(&scalar, 6));
    detected.drain_and_close().unwrap();
    scalar.drain_and_close().unwrap();
}

#[test]
fn test_minimal_pools_still_flow() {
    let pools = PoolConfig {
        input: 1,
        picture_control_set: 1,
        resource_coordination_results: 1,
        picture_analysis_results: 1,
        picture_decision_results: 1,
        motion_estimation_results: 1,
        initial_rate_control_results: 1,
        picture_demux_results: 1,
        rate_control_tasks: 1,
        rate_control_results: 1,
        enc_dec_tasks: 1,
        enc_dec_results: 1,
        entropy_coding_results: 1,
        output: 1,
    };
    let config = EncoderConfig::new(WIDTH, HEIGHT)
        .pixel_format(PixelFormat::Gray8)
        .workers(2)
        .pool_config(pools);
    let encoder = Encoder::open(config).unwrap();

    let packets = encode(&encoder, 10);
    assert_eq!(packets.len(), 11);
    assert_eq!(encoder.stats().pictures_in_flight, 0);
    encoder.drain_and_close().unwrap();
}

#[test]
fn test_input_after_end_of_stream_is_rejected() {
    let encoder = Encoder::open(EncoderConfig::new(WIDTH, HEIGHT).pixel_format(PixelFormat::Gray8)).unwrap();
    let packets = encode(&encoder, 2);
    assert_eq!(packets.len(), 3);

    assert!(matches!(encoder.submit_frame(&frame(2)), Err(EncodeError::EndOfStreamSent)));
    assert!(matches!(encoder.send_eos(), Err(EncodeError::EndOfStreamSent)));
    encoder.drain_and_close().unwrap();
}

#[test]
fn test_geometry_mismatch_is_rejected() {
    let encoder = Encoder::open(EncoderConfig::new(WIDTH, HEIGHT).pixel_format(PixelFormat::Gray8)).unwrap();
    let wrong = Frame::new(WIDTH * 2, HEIGHT, PixelFormat::Gray8);

    let err = encoder.submit_frame(&wrong).unwrap_err();
    assert_eq!(err.to_string(), "Frame is 128x48 gray8, encoder was opened for 64x48 gray8");
    encoder.drain_and_close().unwrap();
}

#[test]
fn test_close_mid_stream_returns_everything() {
    let encoder = Encoder::open(EncoderConfig::new(WIDTH, HEIGHT).pixel_format(PixelFormat::Gray8).workers(2)).unwrap();
    for pts in 0..3 {
        encoder.submit_frame(&frame(pts)).unwrap();
    }
    assert_eq!(encoder.stage_workers(stage::MOTION_ESTIMATION).unwrap(), 2);
    assert_eq!(encoder.pool_stats(edge::OUTPUT).unwrap().capacity, 8);
    encoder.drain_and_close().unwrap();
}
