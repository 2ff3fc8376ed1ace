use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relaymail::{Attachment, Envelope, Mailbox};

fn criterion_benchmark(c: &mut Criterion) {
    let from: Mailbox = "NoBody <nobody@domain.tld>".parse().unwrap();

    let plain = Envelope::new(
        "Hei <hei@domain.tld>, yuin@domain.tld",
        "Happy new year",
        "Be happy!",
    )
    .cc("Ann <ann@domain.tld>");
    c.bench_function("encode plain message", |b| {
        b.iter(|| black_box(&plain).encode(Some(&from)).unwrap().formatted())
    });

    let mut with_attachment = plain.clone().bcc("audit@domain.tld");
    with_attachment.attach(Attachment::new("data.bin", vec![0xA5; 64 * 1024]));
    c.bench_function("encode message with attachment", |b| {
        b.iter(|| {
            black_box(&with_attachment)
                .encode(Some(&from))
                .unwrap()
                .formatted()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
