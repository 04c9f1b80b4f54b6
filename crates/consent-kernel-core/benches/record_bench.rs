use consent_kernel_core::{Catalog, ConsentRecord, RestrictionEntry, RestrictionKind};
use criterion::{criterion_group, criterion_main, Criterion};

fn fixture_catalog() -> Catalog {
    Catalog {
        list_version: 348,
        policy_version: 2,
        purpose_count: 11,
        vendor_count: 5_000,
        special_feature_count: 2,
    }
}

fn bench_attach(c: &mut Criterion) {
    c.bench_function("attach_catalog", |b| {
        b.iter(|| ConsentRecord::with_catalog(fixture_catalog()));
    });
}

fn bench_vendor_writes(c: &mut Criterion) {
    c.bench_function("vendor_consent_writes_1k", |b| {
        b.iter(|| {
            let mut record = ConsentRecord::with_catalog(fixture_catalog());
            if let Some(binding) = record.binding_mut() {
                for id in 1..=1_000_u16 {
                    if let Err(err) = binding.vendor_consents.set(id, id % 2 == 0) {
                        panic!("vendor {id} is in the catalog domain: {err}");
                    }
                }
            }
            record
        });
    });
}

fn bench_restriction_writes(c: &mut Criterion) {
    c.bench_function("publisher_restriction_writes_100", |b| {
        b.iter(|| {
            let mut record = ConsentRecord::with_catalog(fixture_catalog());
            if let Some(binding) = record.binding_mut() {
                for id in 1..=100_u16 {
                    let mut entry = RestrictionEntry::default();
                    entry.restrict(1, RestrictionKind::RequireConsent);
                    if let Err(err) = binding.publisher_restrictions.set(id, entry) {
                        panic!("vendor {id} is in the catalog domain: {err}");
                    }
                }
            }
            record
        });
    });
}

criterion_group!(benches, bench_attach, bench_vendor_writes, bench_restriction_writes);
criterion_main!(benches);
