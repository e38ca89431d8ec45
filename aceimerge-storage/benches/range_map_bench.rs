// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use aceimerge_core::{BooleanIssue, ChannelKey, IssueType, MergeSettings};
use aceimerge_storage::{BooleanRangeMap, StoreRegistry};
use chrono::{DateTime, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const CHANNEL: &str = "ASAR.AS01.SHZ";

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_600_000_000_000 + ms).unwrap()
}

fn issue(channel: &str, start_ms: i64, end_ms: i64, status: bool) -> BooleanIssue {
    BooleanIssue::synthesize(channel, IssueType::VaultDoorOpened, at(start_ms), at(end_ms), status)
        .unwrap()
}

fn bench_sequential_puts(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_puts");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut map = BooleanRangeMap::new(
                    ChannelKey::new(CHANNEL, IssueType::VaultDoorOpened),
                    MergeSettings::new(500),
                );
                // Alternate statuses so nothing fuses and the map grows.
                for i in 0..size as i64 {
                    let start = i * 10_000;
                    map.put(black_box(issue(CHANNEL, start, start + 5_000, i % 2 == 0)))
                        .unwrap();
                }
                map.size()
            });
        });
    }

    group.finish();
}

fn bench_conflicting_put(c: &mut Criterion) {
    let mut map = BooleanRangeMap::new(
        ChannelKey::new(CHANNEL, IssueType::VaultDoorOpened),
        MergeSettings::new(500),
    );
    for i in 0..10_000i64 {
        let start = i * 10_000;
        map.put(issue(CHANNEL, start, start + 5_000, false)).unwrap();
    }

    c.bench_function("conflicting_put_covered", |b| {
        b.iter(|| {
            let candidate = issue(CHANNEL, 50_000_000, 50_004_000, true);
            map.put(black_box(candidate)).unwrap()
        });
    });
}

fn bench_registry_put(c: &mut Criterion) {
    let registry = StoreRegistry::new(MergeSettings::new(500));
    let channels: Vec<String> = (0..64).map(|i| format!("STA{i:02}.BHZ")).collect();
    let mut tick = 0i64;

    c.bench_function("registry_put_64_channels", |b| {
        b.iter(|| {
            let channel = &channels[(tick % 64) as usize];
            let start = (tick / 64) * 1_000;
            tick += 1;
            registry
                .put(black_box(issue(channel, start, start + 1_000, true)))
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_sequential_puts, bench_conflicting_put, bench_registry_put);
criterion_main!(benches);
