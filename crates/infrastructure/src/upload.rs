//! 开发环境用的附件上传器：不落盘，直接把内容编码成 `data:` URL。

use application::{AttachmentUploader, UploadError};
use async_trait::async_trait;
use data_encoding::BASE64;
use tracing::debug;

const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
];

pub fn is_allowed_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    match essence.strip_prefix("image/") {
        Some(subtype) => !subtype.is_empty(),
        None => DOCUMENT_TYPES.contains(&essence.as_str()),
    }
}

#[derive(Debug, Clone)]
pub struct DataUrlUploader {
    max_bytes: usize,
}

impl DataUrlUploader {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl AttachmentUploader for DataUrlUploader {
    async fn upload(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if !is_allowed_content_type(content_type) {
            return Err(UploadError::UnsupportedType(content_type.to_string()));
        }
        if bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }

        let essence = content_type.split(';').next().unwrap_or_default().trim();
        debug!("编码 {} 字节的 {} 附件", bytes.len(), essence);
        Ok(format!("data:{};base64,{}", essence, BASE64.encode(&bytes)))
    }
}
