//! Serialization benchmarks
//!
//! Measures message encoding and decoding without network I/O.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use openigtlink_connect::protocol::{
    message::IgtlMessage,
    types::{CommandMessage, TransformMessage},
};

fn bench_transform_serialize(c: &mut Criterion) {
    c.bench_function("transform_message_serialize", |b| {
        b.iter(|| {
            let transform = TransformMessage::translation(10.0, 20.0, 30.0);
            let msg = IgtlMessage::new(transform, "Tracker").unwrap();
            black_box(msg.encode().unwrap())
        });
    });
}

fn bench_command_round_trip(c: &mut Criterion) {
    let command = CommandMessage::new(
        1,
        "StartRecording",
        r#"<Command Name="StartRecording"><Param Value="1"/></Command>"#,
    );
    let encoded = IgtlMessage::new(command, "Ultrasound").unwrap().encode().unwrap();

    c.bench_function("command_message_decode", |b| {
        b.iter(|| black_box(IgtlMessage::<CommandMessage>::decode(&encoded).unwrap()));
    });
}

criterion_group!(benches, bench_transform_serialize, bench_command_round_trip);

criterion_main!(benches);
