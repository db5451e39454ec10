//! Frame and method codec benchmarks.

use amqpmux_protocol::method::{BasicDeliver, BasicPublish, QueueDeclareOk};
use amqpmux_protocol::{
    ContentHeader, FieldTable, FrameDecoder, FrameEncoder, MessageProperties, Method,
    MethodRegistry, Role,
};
use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn test_properties() -> MessageProperties {
    let mut headers = FieldTable::new();
    headers.insert("tenant".into(), "acme".into());
    headers.insert("attempt".into(), 3i32.into());
    MessageProperties::new()
        .with_content_type("application/json")
        .with_correlation_id("req-12345")
        .with_reply_to("amq.rabbitmq.reply-to")
        .with_message_id("msg-67890")
        .with_headers(headers)
        .with_persistent()
}

fn bench_body_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_frame_encode");

    for size in [100, 1000, 10000] {
        let chunk = vec![0x42u8; size];

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &chunk, |b, chunk| {
            let mut buf = BytesMut::with_capacity(size + 8);
            b.iter(|| {
                buf.clear();
                FrameEncoder::body_frame(&mut buf, 1, chunk).unwrap();
                black_box(buf.len())
            });
        });
    }

    group.finish();
}

fn bench_frame_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for size in [100, 1000, 10000] {
        let mut encoded = BytesMut::new();
        FrameEncoder::body_frame(&mut encoded, 1, &vec![0x42u8; size]).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            let mut decoder = FrameDecoder::new();
            b.iter(|| {
                decoder.extend(encoded);
                black_box(decoder.decode_frame().unwrap())
            });
        });
    }

    group.finish();
}

fn bench_method_format(c: &mut Criterion) {
    let registry = MethodRegistry::amqp();
    let publish: Method = BasicPublish::new("orders", "order.created").into();

    c.bench_function("method_format_publish", |b| {
        let mut buf = BytesMut::with_capacity(256);
        b.iter(|| {
            buf.clear();
            FrameEncoder::method_frame(&mut buf, 1, &registry, &publish).unwrap();
            black_box(buf.len())
        });
    });
}

fn bench_method_parse(c: &mut Criterion) {
    let registry = MethodRegistry::amqp();
    let broker = MethodRegistry::for_role(Role::Server);
    let mut group = c.benchmark_group("method_parse");

    let methods: Vec<(&str, Method)> = vec![
        (
            "basic.deliver",
            BasicDeliver {
                consumer_tag: "amq.ctag-3hK4pYx2".into(),
                delivery_tag: 42,
                redelivered: false,
                exchange: "orders".into(),
                routing_key: "order.created".into(),
            }
            .into(),
        ),
        (
            "queue.declare-ok",
            QueueDeclareOk {
                queue: "jobs".into(),
                message_count: 10,
                consumer_count: 2,
            }
            .into(),
        ),
    ];

    for (name, method) in methods {
        let mut payload = BytesMut::new();
        broker.format(&method, &mut payload).unwrap();
        let payload = payload.freeze();

        group.bench_with_input(BenchmarkId::from_parameter(name), &payload, |b, payload| {
            b.iter(|| black_box(registry.parse(payload.clone()).unwrap()));
        });
    }

    group.finish();
}

fn bench_content_header(c: &mut Criterion) {
    let header = ContentHeader::new(1024, test_properties());
    let mut encoded = BytesMut::new();
    header.write(&mut encoded).unwrap();
    let encoded: Bytes = encoded.freeze();

    let mut group = c.benchmark_group("content_header");
    group.bench_function("write", |b| {
        let mut buf = BytesMut::with_capacity(256);
        b.iter(|| {
            buf.clear();
            header.write(&mut buf).unwrap();
            black_box(buf.len())
        });
    });
    group.bench_function("read", |b| {
        b.iter(|| {
            let mut buf = encoded.clone();
            black_box(ContentHeader::read(&mut buf).unwrap())
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_body_frame_encode,
    bench_frame_decode,
    bench_method_format,
    bench_method_parse,
    bench_content_header,
);

criterion_main!(benches);
