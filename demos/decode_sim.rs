use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use video_hw_decode::sim::{SimAccelerator, SimFault};
use video_hw_decode::{
    Codec, DecodeParams, DecoderEngine, DecoderPreference, EsPacket, FieldOrder, OutputTarget,
    RawFormat, SinkItem, VideoStreamInfo, channel_sink, make_i420_dummy,
};

#[derive(Parser, Debug)]
#[command(about = "Decode a synthetic stream through the simulated accelerator")]
struct Args {
    #[arg(long, default_value = "h264")]
    codec: String,
    #[arg(long, default_value_t = 640)]
    width: u32,
    #[arg(long, default_value_t = 360)]
    height: u32,
    #[arg(long, default_value_t = 120)]
    packets: i64,
    #[arg(long, default_value_t = 1)]
    interval: u32,
    #[arg(long, default_value = "host")]
    target: String,
    #[arg(long, default_value_t = false)]
    reuse_buffers: bool,
    #[arg(long, default_value = "auto")]
    preference: String,
    /// Make the feed of this pts time out on every attempt, forcing a restart.
    #[arg(long)]
    stall_at: Option<i64>,
    /// Report a recoverable accelerator reset after this pts.
    #[arg(long)]
    reset_at: Option<i64>,
    #[arg(long, default_value_t = 8)]
    sink_capacity: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("video_hw_decode=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let codec = Codec::from_str(&args.codec)?;
    let target = parse_target(&args.target)?;
    let preference = parse_preference(&args.preference)?;

    let mut params = DecodeParams::new(target);
    params.reuse_buffers = args.reuse_buffers;
    params.preference = preference;
    params.retry.timeout = Duration::from_millis(200);

    let accelerator = Arc::new(SimAccelerator::default());
    if let Some(pts) = args.stall_at {
        accelerator.stall_feed(pts, params.retry.attempts);
    }
    if let Some(pts) = args.reset_at {
        accelerator.inject(pts, SimFault::SwReset);
    }

    let (sink, rx) = channel_sink(args.sink_capacity.max(1));
    let mut engine = DecoderEngine::new(params).with_accelerator(accelerator.clone());
    engine.attach_sink(sink);
    let info = VideoStreamInfo::new(codec, args.width, args.height, FieldOrder::Progressive);
    engine
        .open(&info, args.interval)
        .with_context(|| format!("failed to open decoder for {info}"))?;

    let consumer = thread::spawn(move || {
        let mut frames = 0usize;
        let mut bytes = 0usize;
        let mut invalid = 0usize;
        while let Ok(item) = rx.recv() {
            match item {
                SinkItem::Frame(info) => match info.frame {
                    Some(frame) => {
                        frames += 1;
                        bytes += frame.bytes();
                    }
                    None => invalid += 1,
                },
                SinkItem::Eos => break,
            }
        }
        (frames, bytes, invalid)
    });

    let started = Instant::now();
    for pts in 0..args.packets {
        let payload = payload_for(&info, pts);
        if let Err(err) = engine.feed(EsPacket::new(&payload, pts)) {
            tracing::warn!(pts, error = %err, "feed rejected, stopping");
            break;
        }
    }
    if let Err(err) = engine.feed_eos() {
        tracing::warn!(error = %err, "eos rejected");
    }
    engine.close();
    let elapsed = started.elapsed();

    let (frames, bytes, invalid) = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("frame consumer panicked"))?;
    let stats = engine.stats();
    let counters = accelerator.counters();
    println!(
        "path={:?}, frames={}, invalid={}, bytes={}, decoded={}, restarts={}, sessions={}, outstanding_refs={}, elapsed_ms={}",
        engine.path(),
        frames,
        invalid,
        bytes,
        stats.frames_decoded,
        stats.restarts,
        counters.sessions_created,
        counters.outstanding(),
        elapsed.as_millis()
    );
    Ok(())
}

/// Raw codecs need a full picture per packet; the simulator only looks at length.
fn payload_for(info: &VideoStreamInfo, pts: i64) -> Vec<u8> {
    let (width, height) = (info.coded_width as usize, info.coded_height as usize);
    match info.codec {
        Codec::RawVideo(RawFormat::I420) => make_i420_dummy(width, height, pts as u8).data.concat(),
        Codec::RawVideo(RawFormat::Yuyv422) => vec![128; width * 2 * height],
        _ => vec![0; 512],
    }
}

fn parse_target(value: &str) -> Result<OutputTarget> {
    match value.to_ascii_lowercase().as_str() {
        "host" => Ok(OutputTarget::Host),
        "device" => Ok(OutputTarget::Device),
        other => bail!("unknown output target: {other}"),
    }
}

fn parse_preference(value: &str) -> Result<DecoderPreference> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(DecoderPreference::Auto),
        "hw" | "hardware" => Ok(DecoderPreference::Hardware),
        "sw" | "software" => Ok(DecoderPreference::Software),
        other => bail!("unknown decoder preference: {other}"),
    }
}
