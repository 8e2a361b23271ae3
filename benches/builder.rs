#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use docpack::{Builder, Value};

const N_ARR: usize = 10;
const N_OBJ: usize = 10;

fn build_doc(b: &mut Builder) {
    b.open_array(false).unwrap();
    for i in 0..N_ARR {
        b.add(Value::object()).unwrap();
        for j in 0..N_OBJ {
            let key = format!("attr{:02}", j);
            b.insert(&key, Value::array()).unwrap();
            for k in 0..N_ARR {
                b.add((i * j * k) as i64).unwrap();
            }
            b.close().unwrap();
        }
        b.close().unwrap();
    }
    b.close().unwrap();
}

fn doc_size() -> usize {
    let mut b = Builder::new();
    build_doc(&mut b);
    b.size().unwrap()
}

fn bench_build(c: &mut Criterion) {
    c.bench_function(
        &format!("building a nested document of {} bytes", doc_size()),
        |bench| {
            bench.iter(|| {
                let mut b = Builder::new();
                build_doc(&mut b);
                black_box(b.size().unwrap())
            })
        },
    );
}

fn bench_build_reused(c: &mut Criterion) {
    let mut b = Builder::new();
    c.bench_function(
        &format!(
            "building a nested document of {} bytes, buffer reused",
            doc_size()
        ),
        move |bench| {
            bench.iter(|| {
                b.clear();
                build_doc(&mut b);
                black_box(b.size().unwrap())
            })
        },
    );
}

fn bench_lookup(c: &mut Criterion) {
    let mut b = Builder::new();
    b.open_object(false).unwrap();
    for i in 0..1_000 {
        b.insert(&format!("key{:04}", i), i as i64).unwrap();
    }
    b.close().unwrap();

    c.bench_function("binary search in a 1000-attribute object", move |bench| {
        bench.iter(|| {
            let obj = b.slice().unwrap();
            black_box(obj.get("key0777").unwrap().unwrap())
        })
    });
}

criterion_group!(benches, bench_build, bench_build_reused, bench_lookup);
criterion_main!(benches);
