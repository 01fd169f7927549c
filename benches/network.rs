#[macro_use]
extern crate criterion;

use chrono::{Duration, TimeZone, Utc};
use criterion::Criterion;

use collectd::api::{Value, ValueList, ValueListBuilder};
use collectd::network::buffer::{Buffer, DEFAULT_BUFFER_SIZE};
use collectd::network::parse::{parse, ParseOpts};

fn value_lists() -> Vec<ValueList> {
    (0..20)
        .map(|seq| {
            ValueListBuilder::new("example.com", "cpu", "cpu")
                .plugin_instance(seq.to_string())
                .type_instance("user")
                .time(Utc.timestamp(1588164686, 0))
                .interval(Duration::seconds(10))
                .values(vec![Value::Derive(seq)])
                .build()
                .unwrap()
        })
        .collect()
}

fn encode_datagram(c: &mut Criterion) {
    let lists = value_lists();
    c.bench_function("encode_datagram", |b| {
        b.iter(|| {
            let mut buffer = Buffer::new(DEFAULT_BUFFER_SIZE);
            for vl in &lists {
                buffer.write(vl).unwrap();
            }
            buffer.finish().unwrap()
        })
    });
}

fn parse_datagram(c: &mut Criterion) {
    let mut buffer = Buffer::new(DEFAULT_BUFFER_SIZE);
    for vl in &value_lists() {
        buffer.write(vl).unwrap();
    }
    let datagram = buffer.finish().unwrap();

    c.bench_function("parse_datagram", |b| {
        b.iter(|| parse(&datagram, ParseOpts::default()).unwrap())
    });
}

criterion_group!(benches, encode_datagram, parse_datagram);
criterion_main!(benches);
