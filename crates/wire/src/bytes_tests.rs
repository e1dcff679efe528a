// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn reader_round_trips_writer_output() {
    let mut w = ByteWriter::new();
    w.u8(0xAB);
    w.u16_be(0x1234);
    w.u24_be(0xFFFFFF);
    w.u32_ne(42);

    let buf = w.into_vec();
    let mut r = ByteReader::new(&buf);
    assert_eq!(r.u8().unwrap(), 0xAB);
    assert_eq!(r.u16_be().unwrap(), 0x1234);
    assert_eq!(r.u24_be().unwrap(), 0xFFFFFF);
    assert_eq!(r.u32_ne().unwrap(), 42);
    assert!(r.finish("test").is_ok());
}

#[test]
fn short_read_reports_offset_and_need() {
    let mut r = ByteReader::new(&[0x01, 0x02]);
    assert_eq!(r.u8().unwrap(), 0x01);
    assert_eq!(r.u32_be(), Err(WireError::ShortBuffer { at: 1, needed: 3 }));
}

#[test]
fn finish_rejects_trailing_bytes() {
    let mut r = ByteReader::new(&[0x01, 0x02, 0x03]);
    let _ = r.u8().unwrap();
    assert_eq!(
        r.finish("frame"),
        Err(WireError::TrailingBytes { context: "frame", remaining: 2 })
    );
}

#[test]
fn patch_overwrites_length_slot() {
    let mut w = ByteWriter::new();
    w.u32_be(0);
    w.bytes(b"abcd");
    w.patch_u32_be(0, 4);
    assert_eq!(w.into_vec(), vec![0, 0, 0, 4, b'a', b'b', b'c', b'd']);
}
