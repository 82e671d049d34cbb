#![allow(dead_code)]

pub mod h2_server;
pub mod mock_server;
pub mod tls;

use std::io::Write;

/// Install the test log subscriber; repeat calls are no-ops so every mock
/// server constructor can invoke it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Gzip-compress a payload for canned response bodies.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Brotli-compress a payload for canned response bodies.
pub fn brotli_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
        writer.write_all(data).unwrap();
    }
    out
}
