use serde_derive::Serialize;
use std::fmt;

use crate::error::Result;
use crate::yaz0;

#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize)]
pub enum CompressionType {
    None,
    Yaz0,
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionType::None => write!(f, "none"),
            CompressionType::Yaz0 => write!(f, "yaz0"),
        }
    }
}

impl CompressionType {
    /// Identify the compression of a payload from its leading bytes.
    pub fn detect(data: &[u8]) -> CompressionType {
        if yaz0::is_yaz0(data) {
            CompressionType::Yaz0
        } else {
            CompressionType::None
        }
    }

    pub fn compress(data: &[u8], compression_type: CompressionType) -> Vec<u8> {
        match compression_type {
            CompressionType::Yaz0 => yaz0::encode(data),
            CompressionType::None => data.to_owned(),
        }
    }

    pub fn decompress(compressed: &[u8], compression_type: CompressionType) -> Result<Vec<u8>> {
        Ok(match compression_type {
            CompressionType::Yaz0 => yaz0::decode(compressed)?,
            CompressionType::None => compressed.to_owned(),
        })
    }
}
