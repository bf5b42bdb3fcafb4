//! 🏎️ How fast does the in-process reducer chew through a match's worth of events?
//!
//! A real match is tens of thousands of events. We fake one with a repeating mix of
//! intervals, kills and chat, and reduce it with and without log parsing.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use parsr::pipeline::{EventStream, InProcessReducer, Reducer};
use tokio::runtime::Runtime;

fn fake_events(count: usize) -> Vec<u8> {
    let mut events = String::with_capacity(count * 64);
    for i in 0..count {
        let line = match i % 10 {
            0 => format!(r#"{{"type":"chat","time":{i},"slot":{},"key":"gg wp"}}"#, i % 10),
            1..=3 => format!(r#"{{"type":"DOTA_COMBATLOG_DEATH","time":{i},"slot":{}}}"#, i % 10),
            _ => format!(r#"{{"type":"interval","time":{i},"slot":{},"gold":{}}}"#, i % 10, i * 3),
        };
        events.push_str(&line);
        events.push('\n');
    }
    events.into_bytes()
}

fn bench_reduce(c: &mut Criterion) {
    let runtime = Runtime::new().expect("💀 no runtime, no bench");
    let mut group = c.benchmark_group("in_process_reducer");

    for count in [1_000usize, 50_000] {
        let events = fake_events(count);
        group.throughput(Throughput::Bytes(events.len() as u64));
        for do_log_parse in [false, true] {
            group.bench_with_input(
                BenchmarkId::new(format!("log_parse={do_log_parse}"), count),
                &events,
                |b, events| {
                    b.to_async(&runtime).iter(|| async {
                        let stream: EventStream = Box::new(std::io::Cursor::new(events.clone()));
                        InProcessReducer
                            .reduce(stream, 1, do_log_parse, 256 * 1024 * 1024)
                            .await
                            .expect("💀 bench events should reduce")
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_reduce);
criterion_main!(benches);
