//! Encode a synthetic moving gradient and report per-picture results.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example encode_synthetic -- [frames] [workers]
//! RUST_LOG=penc=debug cargo run --example encode_synthetic
//! ```

use penc::{Encoder, EncoderConfig, Frame, PixelFormat, SliceType};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

fn gradient(frame: &mut Frame, shift: usize) {
    let stride = frame.stride(0);
    if let Some(luma) = frame.plane_mut(0) {
        for (y, row) in luma.chunks_mut(stride).take(HEIGHT as usize).enumerate() {
            for (x, sample) in row.iter_mut().take(WIDTH as usize).enumerate() {
                *sample = ((x + shift) ^ y) as u8;
            }
        }
    }
    for plane in 1..frame.num_planes() {
        if let Some(chroma) = frame.plane_mut(plane) {
            chroma.fill(128);
        }
    }
}

fn main() -> penc::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let frames: i64 = args.next().and_then(|a| a.parse().ok()).unwrap_or(60);
    let workers: usize = args.next().and_then(|a| a.parse().ok()).unwrap_or(0);

    let config = EncoderConfig::new(WIDTH, HEIGHT)
        .pixel_format(PixelFormat::Yuv420p)
        .intra_period(30)
        .workers(workers);

    println!("Synthetic Encode");
    println!("══════════════════════════════════════════════════════════");
    println!("  Size:      {WIDTH}x{HEIGHT} {}", config.pixel_format);
    println!("  Frames:    {frames}");
    println!("  Kernels:   {}", penc::build_info().simd);
    println!();

    let encoder = Encoder::open(config)?;
    let start = Instant::now();

    let packets = std::thread::scope(|scope| -> penc::Result<Vec<penc::EncodedPacket>> {
        let receiver = scope.spawn(|| {
            let mut packets = Vec::new();
            while let Some(packet) = encoder.receive_packet()? {
                packets.push(packet);
            }
            Ok::<_, penc::EncodeError>(packets)
        });

        let mut frame = Frame::new(WIDTH, HEIGHT, PixelFormat::Yuv420p);
        for pts in 0..frames {
            gradient(&mut frame, pts as usize * 2);
            frame.pts = pts;
            if let Err(e) = encoder.submit_frame(&frame) {
                eprintln!("submit failed: {e}");
                break;
            }
        }
        encoder.send_eos()?;
        receiver.join().unwrap_or_else(|_| Ok(Vec::new()))
    })?;

    let elapsed = start.elapsed();
    let stats = encoder.stats();

    println!("  #     type  qp   bytes");
    println!("────────────────────────────────────────────────────────────");
    for packet in packets.iter().filter(|p| !p.end_of_stream) {
        println!(
            "  {:<5} {:<5} {:<4} {}",
            packet.picture_number,
            packet.slice_type,
            packet.qp,
            packet.data.len()
        );
    }

    let total: usize = packets.iter().map(|p| p.data.len()).sum();
    let intra = packets.iter().filter(|p| p.slice_type == SliceType::I && !p.end_of_stream).count();
    println!();
    println!("  Pictures:     {} ({intra} intra)", stats.packets_received);
    println!("  Bytes:        {total}");
    println!("  Input waits:  {}", stats.input_waits);
    println!(
        "  Throughput:   {:.1} fps",
        stats.packets_received as f64 / elapsed.as_secs_f64().max(1e-9)
    );

    encoder.drain_and_close()
}
