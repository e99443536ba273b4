//! Command codec and framing benchmarks.

use bytes::Bytes;
use colacam_protocol::{cola2, colab, Command, CommandType, ParameterWriter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn create_command(param_size: usize) -> Command {
    ParameterWriter::new(CommandType::WriteVariable, "ApplicationParams")
        .u32(7)
        .bytes(&vec![0x5a; param_size])
        .build()
}

fn bench_command_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_decode");

    for size in [16, 1024, 65536] {
        let raw = create_command(size).buffer().clone();

        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &raw, |b, raw| {
            b.iter(|| black_box(Command::decode(raw.clone()).unwrap()));
        });
    }

    group.finish();
}

fn bench_colab_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("colab_encode");

    for size in [16, 1024, 65536] {
        let command = create_command(size);

        group.throughput(Throughput::Bytes(command.buffer().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &command, |b, command| {
            b.iter(|| black_box(colab::encode(command.buffer()).unwrap()));
        });
    }

    group.finish();
}

fn bench_colab_split_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("colab_split_checksum");

    for size in [16, 1024, 65536] {
        let encoded = colab::encode(create_command(size).buffer()).unwrap();
        let body = Bytes::copy_from_slice(&encoded[colab::HEADER_LEN..]);

        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new("verify", size), &body, |b, body| {
            b.iter(|| black_box(colab::split_checksum(body.clone(), true).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("no_verify", size), &body, |b, body| {
            b.iter(|| black_box(colab::split_checksum(body.clone(), false).unwrap()));
        });
    }

    group.finish();
}

fn bench_cola2_encode(c: &mut Criterion) {
    let command = create_command(1024);

    c.bench_function("cola2_encode_command", |b| {
        b.iter(|| {
            let header = cola2::Header::new(black_box(0x1234_5678), black_box(42));
            black_box(cola2::encode_command(header, &command).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_command_decode,
    bench_colab_encode,
    bench_colab_split_checksum,
    bench_cola2_encode,
);
criterion_main!(benches);
