use std::fmt::Write;

use criterion::{criterion_group, criterion_main, Criterion};
use rowdeck_core::decode_csv;

fn clean_fixture(rows: usize) -> String {
    let mut csv = String::from("postId,id,name,email,body\n");
    for index in 0..rows {
        let _ = writeln!(
            csv,
            "{},{},name-{index},user{index}@example.com,\"comment {index}, with a quoted clause\"",
            index % 50 + 1,
            index + 1
        );
    }
    csv
}

fn noisy_fixture(rows: usize) -> String {
    let mut csv = String::from("postId,id,name,email,body\n");
    for index in 0..rows {
        if index % 10 == 0 {
            let _ = writeln!(
                csv,
                "{},not-a-number,name-{index},user{index}@example.com,bad row",
                index % 50 + 1
            );
        } else {
            let _ = writeln!(
                csv,
                "{},{},name-{index},user{index}@example.com,comment {index}",
                index % 50 + 1,
                index + 1
            );
        }
    }
    csv
}

fn bench_decode_clean(c: &mut Criterion) {
    let payload = clean_fixture(5_000);
    c.bench_function("decode_csv_5000_clean_rows", |b| {
        b.iter(|| {
            let upload = match decode_csv(payload.as_bytes()) {
                Ok(upload) => upload,
                Err(err) => panic!("clean benchmark fixture should decode: {err}"),
            };
            assert_eq!(upload.rows.len(), 5_000);
        });
    });
}

fn bench_decode_noisy(c: &mut Criterion) {
    let payload = noisy_fixture(5_000);
    c.bench_function("decode_csv_5000_rows_with_rejections", |b| {
        b.iter(|| {
            let upload = match decode_csv(payload.as_bytes()) {
                Ok(upload) => upload,
                Err(err) => panic!("noisy benchmark fixture should decode: {err}"),
            };
            assert_eq!(upload.rejected.len(), 500);
        });
    });
}

criterion_group!(ingest_benches, bench_decode_clean, bench_decode_noisy);
criterion_main!(ingest_benches);
