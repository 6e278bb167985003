//! Reassembly is independent of where a message is split into packets.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use proptest::prelude::*;
use sqlclient_codec::PacketFramer;
use tds_protocol::PacketType;

fn roundtrip(payload: Vec<u8>, packet_size: usize) -> (Bytes, usize) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async move {
        let (client, server) = tokio::io::duplex(1 << 20);
        let mut sender = PacketFramer::with_packet_size(client, packet_size);
        let mut receiver = PacketFramer::with_packet_size(server, packet_size);

        sender
            .send(PacketType::TabularResult, Bytes::from(payload))
            .await
            .unwrap();
        let message = receiver.receive().await.unwrap();
        assert_eq!(message.packet_type, PacketType::TabularResult);
        (message.payload, receiver.packet_size())
    })
}

proptest! {
    #[test]
    fn reassembly_is_split_invariant(
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
        packet_size in 512usize..=4096,
    ) {
        let (received, size) = roundtrip(payload.clone(), packet_size);
        prop_assert_eq!(size, packet_size);
        prop_assert_eq!(&received[..], &payload[..]);
    }
}

#[test]
fn one_two_and_many_packets_agree() {
    let payload: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let (one, _) = roundtrip(payload.clone(), 4096);
    let (two, _) = roundtrip(payload.clone(), 2048);
    let (many, _) = roundtrip(payload.clone(), 512);
    assert_eq!(one, two);
    assert_eq!(two, many);
    assert_eq!(&many[..], &payload[..]);
}

#[tokio::test]
async fn consecutive_messages_stay_separate() {
    let (client, server) = tokio::io::duplex(1 << 16);
    let mut sender = PacketFramer::with_packet_size(client, 512);
    let mut receiver = PacketFramer::with_packet_size(server, 512);

    sender
        .send(PacketType::TabularResult, Bytes::from(vec![1u8; 700]))
        .await
        .unwrap();
    sender
        .send(PacketType::TabularResult, Bytes::from_static(b"second"))
        .await
        .unwrap();

    assert_eq!(receiver.receive().await.unwrap().len(), 700);
    assert_eq!(&receiver.receive().await.unwrap().payload[..], b"second");
}
