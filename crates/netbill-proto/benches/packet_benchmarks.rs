use criterion::{black_box, criterion_group, criterion_main, Criterion};
use netbill_proto::{Attribute, AttributeType, Code, Packet};

fn create_disconnect_request() -> Packet {
    let mut packet = Packet::new(Code::DisconnectRequest, 1);
    packet.add_attribute(
        Attribute::text(AttributeType::UserName as u8, "subscriber-001")
            .expect("Failed to create User-Name attribute"),
    );
    packet.add_attribute(
        Attribute::text(AttributeType::AcctSessionId as u8, "8C2A0001")
            .expect("Failed to create Acct-Session-Id attribute"),
    );
    packet.add_attribute(
        Attribute::ipv4(AttributeType::FramedIpAddress as u8, [10, 64, 3, 17])
            .expect("Failed to create Framed-IP-Address attribute"),
    );
    packet.add_attribute(
        Attribute::ipv4(AttributeType::NasIpAddress as u8, [192, 0, 2, 1])
            .expect("Failed to create NAS-IP-Address attribute"),
    );
    packet.sign(b"testing123");
    packet
}

fn bench_disconnect_encode(c: &mut Criterion) {
    let packet = create_disconnect_request();
    c.bench_function("disconnect_request_encode", |b| {
        b.iter(|| packet.encode().expect("Failed to encode packet"))
    });
}

fn bench_disconnect_sign(c: &mut Criterion) {
    c.bench_function("disconnect_request_sign", |b| {
        b.iter(|| {
            let mut packet = create_disconnect_request();
            packet.sign(black_box(b"testing123"));
            packet.authenticator
        })
    });
}

fn bench_disconnect_decode(c: &mut Criterion) {
    let encoded = create_disconnect_request().encode().expect("Failed to encode");
    c.bench_function("disconnect_request_decode", |b| {
        b.iter(|| Packet::decode(black_box(&encoded)).expect("Failed to decode packet"))
    });
}

criterion_group!(
    benches,
    bench_disconnect_encode,
    bench_disconnect_sign,
    bench_disconnect_decode
);
criterion_main!(benches);
