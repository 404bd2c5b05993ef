//! Firmware image header probe for version gating.
//!
//! An ESP-IDF app image starts with a 24-byte image header and an 8-byte
//! segment header, followed by the 256-byte `esp_app_desc_t`. The version
//! string sits 16 bytes into the descriptor.

use heapless::String;

use super::packet::{AbortReason, SessionFlags};

pub const IMAGE_MAGIC: u8 = 0xE9;
pub const APP_DESC_MAGIC: u32 = 0xABCD_5432;
pub const APP_DESC_OFFSET: usize = 24 + 8;
pub const VERSION_OFFSET: usize = APP_DESC_OFFSET + 16;
pub const VERSION_LEN: usize = 32;
/// Bytes that must be present before the version can be read.
pub const IMAGE_HEADER_LEN: usize = APP_DESC_OFFSET + 256;

pub type FirmwareVersion = String<VERSION_LEN>;

/// Extract the app version from the head of an image.
pub fn parse_version(head: &[u8]) -> Option<FirmwareVersion> {
    if head.len() < IMAGE_HEADER_LEN || head[0] != IMAGE_MAGIC {
        return None;
    }
    let magic = u32::from_le_bytes([
        head[APP_DESC_OFFSET],
        head[APP_DESC_OFFSET + 1],
        head[APP_DESC_OFFSET + 2],
        head[APP_DESC_OFFSET + 3],
    ]);
    if magic != APP_DESC_MAGIC {
        return None;
    }

    let field = &head[VERSION_OFFSET..VERSION_OFFSET + VERSION_LEN];
    let end = field.iter().position(|&b| b == 0).unwrap_or(VERSION_LEN);
    let text = core::str::from_utf8(&field[..end]).ok()?;
    let mut version = FirmwareVersion::new();
    version.push_str(text).ok()?;
    Some(version)
}

/// Apply the session's version policy to the first bytes of the image.
///
/// Only called when [`SessionFlags::needs_version_check`] holds.
pub fn check_version(
    head: &[u8],
    flags: SessionFlags,
    running: Option<&str>,
    last_invalid: Option<&str>,
) -> Result<FirmwareVersion, AbortReason> {
    let incoming = parse_version(head).ok_or(AbortReason::InvalidVersion)?;

    if flags.check_against_last_invalid && last_invalid == Some(incoming.as_str()) {
        return Err(AbortReason::InvalidVersion);
    }
    if flags.check_against_running_version && running == Some(incoming.as_str()) {
        return Err(AbortReason::SameVersion);
    }
    Ok(incoming)
}
