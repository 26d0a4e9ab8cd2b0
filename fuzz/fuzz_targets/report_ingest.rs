#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use motelab_core::{Event, NodeId, SimTime};
use motelab_telemetry::{TelemetryAggregator, TelemetryConfig};

#[derive(Arbitrary, Debug)]
enum Body {
    Text(String),
    Data { source: u32, seqno: u32, hops: u32, latency: u64 },
    Power { cpu: u64, lpm: u64, listen: u64, transmit: u64 },
}

#[derive(Arbitrary, Debug)]
struct Line {
    delta_ms: u16,
    node: u8,
    body: Body,
}

fuzz_target!(|lines: Vec<Line>| {
    let mut agg = TelemetryAggregator::new(TelemetryConfig::default());
    let mut now = 0u64;
    for line in lines {
        now += u64::from(line.delta_ms);
        let text = match line.body {
            Body::Text(text) => text,
            Body::Data { source, seqno, hops, latency } => {
                format!("DATA source={source} seqno={seqno} hops={hops} latency={latency}")
            }
            Body::Power { cpu, lpm, listen, transmit } => {
                format!("POWER cpu={cpu} lpm={lpm} listen={listen} transmit={transmit}")
            }
        };
        let event = Event::new(SimTime::from_millis(now), NodeId::new(u32::from(line.node)), text);
        let _ = agg.ingest(&event);
    }

    let totals = agg.totals();
    assert!(totals.lost + totals.duplicates <= totals.received);
    let summary = agg.summary();
    assert!(summary.avg_hops_per_message.is_finite());
});
