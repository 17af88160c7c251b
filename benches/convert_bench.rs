use std::sync::Arc;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use video_hw_decode::sim::SimAccelerator;
use video_hw_decode::{
    Codec, DecodeParams, DecoderEngine, EsPacket, FieldOrder, FrameInfo, OutputSink, OutputTarget,
    PlanarFormat, PlanarFrame, VideoStreamInfo, make_i420_dummy, normalize_to_nv12,
};

const SIZES: [(usize, usize); 2] = [(1280, 720), (1920, 1080)];

struct DiscardSink;

impl OutputSink for DiscardSink {
    fn create_frame_info(&self) -> Option<FrameInfo> {
        Some(FrameInfo::new())
    }

    fn send_frame_info(&self, _info: FrameInfo) {}

    fn send_flow_eos(&self) {}
}

fn yuyv_frame(width: usize, height: usize) -> PlanarFrame {
    let mut frame = PlanarFrame::default();
    frame.reshape(PlanarFormat::Yuyv422, width, height);
    for (i, byte) in frame.data[0].iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    frame
}

fn convert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_to_nv12");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(5));

    for (width, height) in SIZES {
        let i420 = make_i420_dummy(width, height, 7);
        let yuyv = yuyv_frame(width, height);
        let mut scratch = PlanarFrame::default();
        group.throughput(Throughput::Bytes((width * height * 3 / 2) as u64));

        for (label, source) in [("i420", &i420), ("yuyv", &yuyv)] {
            for align in [1usize, 128] {
                group.bench_with_input(
                    BenchmarkId::new(format!("{label}/align_{align}"), format!("{width}x{height}")),
                    &align,
                    |b, &align| {
                        b.iter(|| {
                            normalize_to_nv12(source, align, &mut scratch)
                                .expect("conversion should succeed in benchmark")
                        });
                    },
                );
            }
        }
    }
    group.finish();
}

fn run_sim_decode(target: OutputTarget, reuse: bool, packets: i64) {
    let mut params = DecodeParams::new(target);
    params.reuse_buffers = reuse;
    params.frame_info_poll = Duration::from_micros(100);
    let mut engine =
        DecoderEngine::new(params).with_accelerator(Arc::new(SimAccelerator::default()));
    engine.attach_sink(Arc::new(DiscardSink));
    let info = VideoStreamInfo::new(Codec::H264, 640, 360, FieldOrder::Progressive);
    engine.open(&info, 1).expect("open should succeed in benchmark");
    let payload = [0u8; 256];
    for pts in 0..packets {
        engine
            .feed(EsPacket::new(&payload, pts))
            .expect("feed should succeed in benchmark");
    }
    engine.feed_eos().expect("eos should succeed in benchmark");
    engine.close();
}

fn sim_decode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sim_decode");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(1));

    let packets = 60;
    group.throughput(Throughput::Elements(packets as u64));
    for (label, target, reuse) in [
        ("host_copy", OutputTarget::Host, false),
        ("device_upload", OutputTarget::Device, false),
        ("device_reuse", OutputTarget::Device, true),
    ] {
        group.bench_function(BenchmarkId::new(label, packets), |b| {
            b.iter(|| run_sim_decode(target, reuse, packets));
        });
    }
    group.finish();
}

criterion_group!(benches, convert_benchmark, sim_decode_benchmark);
criterion_main!(benches);
