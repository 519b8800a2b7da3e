//! 页压缩/解压（LZ4 / None）

use crate::common::{EngineError, Result};
use crate::field_type::CompressionType;

pub fn compress(data: &[u8], codec: CompressionType) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  =>
            lz4::block::compress(data, None, false)
                .map_err(|e| EngineError::Compression(e.to_string())),
    }
}

pub fn decompress(
    data:             &[u8],
    codec:            CompressionType,
    uncompressed_len: usize,
) -> Result<Vec<u8>> {
    match codec {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Lz4  =>
            lz4::block::decompress(data, Some(uncompressed_len as i32))
                .map_err(|e| EngineError::Compression(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_roundtrip() {
        let data: Vec<u8> = b"impression".repeat(100);
        let packed = compress(&data, CompressionType::Lz4).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, CompressionType::Lz4, data.len()).unwrap(), data);
    }
}
