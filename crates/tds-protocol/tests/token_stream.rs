//! Property tests over the token parser and packet header.

#![allow(clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use tds_protocol::{
    ColMetaData, ColumnMetadata, Done, PacketHeader, PacketStatus, PacketType, RawRow, Token,
    TokenParser, TokenType, TypeId, TypeInfo,
};

fn int_table() -> ColMetaData {
    ColMetaData::new(vec![
        ColumnMetadata::new("a", TypeId::IntN, TypeInfo::with_length(4)),
        ColumnMetadata::new("b", TypeId::BigVarBinary, TypeInfo::with_length(64)),
    ])
}

proptest! {
    #[test]
    fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
        let meta = int_table();
        let mut parser = TokenParser::new(Bytes::from(data));
        for _ in 0..64 {
            match parser.next_token_with_metadata(Some(&meta)) {
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    }

    #[test]
    fn rows_survive_encoding(
        a in proptest::option::of(any::<i32>()),
        b in proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
        count in 0u64..1_000_000,
    ) {
        let meta = int_table();
        let row = RawRow::new(vec![
            a.map(|v| Bytes::copy_from_slice(&v.to_le_bytes())),
            b.map(Bytes::from),
        ]);

        let mut buf = BytesMut::new();
        meta.encode(&mut buf);
        row.encode(&meta, &mut buf);
        Done::with_count(count).encode(TokenType::Done, &mut buf);

        let mut parser = TokenParser::new(buf.freeze());
        let Some(Token::ColMetaData(decoded)) = parser.next_token().unwrap() else {
            return Err(TestCaseError::fail("expected COLMETADATA"));
        };
        prop_assert_eq!(parser.next_token_with_metadata(Some(&decoded)).unwrap(), Some(Token::Row(row)));
        let Some(Token::Done(done)) = parser.next_token().unwrap() else {
            return Err(TestCaseError::fail("expected DONE"));
        };
        prop_assert_eq!(done.rows_affected(), Some(count));
        prop_assert!(!parser.has_remaining());
    }

    #[test]
    fn header_roundtrip(length in 8u16.., spid in any::<u16>(), id in any::<u8>()) {
        let mut header = PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, length)
            .with_packet_id(id);
        header.spid = spid;
        let bytes = header.encode_to_bytes();
        prop_assert_eq!(PacketHeader::decode(&mut bytes.as_ref()).unwrap(), header);
    }
}
