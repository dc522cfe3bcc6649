use std::fs::File;
use std::io::Read;
use std::path::Path;

use image::ImageFormat;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::MediaKind;

/// Enough for every signature below, including two MPEG-TS sync bytes.
const HEAD_LEN: u64 = 512;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];
const ASF_MAGIC: [u8; 8] = [0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11];
const MPEG_PS_MAGIC: [u8; 4] = [0x00, 0x00, 0x01, 0xBA];
const MPEG_VIDEO_MAGIC: [u8; 4] = [0x00, 0x00, 0x01, 0xB3];
const MPEG_TS_SYNC: u8 = 0x47;
const MPEG_TS_PACKET: usize = 188;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const EMPTY: &str = "inode/x-empty";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub mime: String,
    pub kind: MediaKind,
}

impl Detection {
    fn new(mime: impl Into<String>) -> Self {
        let mime = mime.into();
        let kind = MediaKind::from_mime(&mime);
        Self { mime, kind }
    }
}

/// Classify a file by its leading bytes. The extension is never consulted.
pub fn detect(path: &Path) -> Result<Detection> {
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut head = Vec::with_capacity(HEAD_LEN as usize);
    file.take(HEAD_LEN)
        .read_to_end(&mut head)
        .map_err(|e| Error::io(path, e))?;

    Ok(detect_bytes(&head))
}

pub fn detect_bytes(head: &[u8]) -> Detection {
    if head.is_empty() {
        return Detection::new(EMPTY);
    }
    match image::guess_format(head) {
        // "P1".."P7" is also how plenty of plain text starts
        Ok(ImageFormat::Pnm) if !is_netpbm_header(head) => {}
        Ok(format) => return Detection::new(format.to_mime_type()),
        Err(_) => {}
    }
    Detection::new(sniff_container(head).unwrap_or(OCTET_STREAM))
}

/// The magic must be followed by whitespace and then a number or a comment;
/// PAM (`P7`) headers continue with an uppercase keyword instead.
fn is_netpbm_header(head: &[u8]) -> bool {
    let rest = head.get(2..).unwrap_or_default();
    if !rest.first().is_some_and(u8::is_ascii_whitespace) {
        return false;
    }
    let pam = head.get(1) == Some(&b'7');
    rest.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b.is_ascii_digit() || b == b'#' || (pam && b.is_ascii_uppercase()))
}

fn sniff_container(head: &[u8]) -> Option<&'static str> {
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return Some(match &head[8..12] {
            b"qt  " => "video/quicktime",
            b"M4A " | b"M4B " | b"M4P " => "audio/mp4",
            // HEIF stills; no decoder available, so they stay unrecognized
            b"heic" | b"heix" | b"mif1" | b"msf1" => return None,
            brand if brand.starts_with(b"3g2") => "video/3gpp2",
            brand if brand.starts_with(b"3gp") => "video/3gpp",
            _ => "video/mp4",
        });
    }
    if head.starts_with(&EBML_MAGIC) {
        // The DocType element sits in the EBML header near the start
        let is_webm = head.windows(4).any(|w| w == b"webm");
        return Some(if is_webm { "video/webm" } else { "video/x-matroska" });
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") {
        return match &head[8..12] {
            b"AVI " => Some("video/x-msvideo"),
            b"WAVE" => Some("audio/x-wav"),
            _ => None,
        };
    }
    if head.starts_with(b"FLV") {
        return Some("video/x-flv");
    }
    if head.starts_with(&ASF_MAGIC) {
        return Some("video/x-ms-asf");
    }
    if head.starts_with(&MPEG_PS_MAGIC) || head.starts_with(&MPEG_VIDEO_MAGIC) {
        return Some("video/mpeg");
    }
    if head.len() > MPEG_TS_PACKET && head[0] == MPEG_TS_SYNC && head[MPEG_TS_PACKET] == MPEG_TS_SYNC {
        return Some("video/mp2t");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    fn encoded(format: image::ImageFormat) -> Vec<u8> {
        let img = match format {
            image::ImageFormat::Gif => image::DynamicImage::ImageRgba8(image::RgbaImage::new(8, 8)),
            _ => image::DynamicImage::ImageRgb8(image::RgbImage::new(8, 8)),
        };
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    fn ftyp(brand: &[u8; 4]) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x18];
        bytes.extend_from_slice(b"ftyp");
        bytes.extend_from_slice(brand);
        bytes.extend_from_slice(&[0; 12]);
        bytes
    }

    #[rstest]
    #[case(image::ImageFormat::Jpeg, "image/jpeg", MediaKind::Image)]
    #[case(image::ImageFormat::Png, "image/png", MediaKind::Image)]
    #[case(image::ImageFormat::Gif, "image/gif", MediaKind::Animated)]
    #[case(image::ImageFormat::Bmp, "image/bmp", MediaKind::Image)]
    #[case(image::ImageFormat::Pnm, "image/x-portable-anymap", MediaKind::Image)]
    fn test_images(#[case] format: image::ImageFormat, #[case] mime: &str, #[case] kind: MediaKind) {
        let detection = detect_bytes(&encoded(format));
        assert_eq!(detection.mime, mime);
        assert_eq!(detection.kind, kind);
    }

    #[rstest]
    #[case(ftyp(b"isom"), "video/mp4")]
    #[case(ftyp(b"mp42"), "video/mp4")]
    #[case(ftyp(b"qt  "), "video/quicktime")]
    #[case(ftyp(b"3gp5"), "video/3gpp")]
    #[case([&EBML_MAGIC[..], &b"\x42\x82\x84webm"[..]].concat(), "video/webm")]
    #[case([&EBML_MAGIC[..], &b"\x42\x82\x88matroska"[..]].concat(), "video/x-matroska")]
    #[case(b"RIFF\x00\x00\x00\x00AVI LIST".to_vec(), "video/x-msvideo")]
    #[case(b"FLV\x01\x05".to_vec(), "video/x-flv")]
    #[case(MPEG_PS_MAGIC.to_vec(), "video/mpeg")]
    fn test_videos(#[case] head: Vec<u8>, #[case] mime: &str) {
        let detection = detect_bytes(&head);
        assert_eq!(detection.mime, mime);
        assert_eq!(detection.kind, MediaKind::Video);
    }

    #[rstest]
    #[case(b"".to_vec(), EMPTY)]
    #[case(b"just some notes\n".to_vec(), OCTET_STREAM)]
    #[case(ftyp(b"M4A "), "audio/mp4")]
    #[case(ftyp(b"heic"), OCTET_STREAM)]
    #[case(b"RIFF\x00\x00\x00\x00WAVEfmt ".to_vec(), "audio/x-wav")]
    fn test_unknown(#[case] head: Vec<u8>, #[case] mime: &str) {
        let detection = detect_bytes(&head);
        assert_eq!(detection.mime, mime);
        assert_eq!(detection.kind, MediaKind::Unknown);
    }

    #[rstest]
    #[case(b"P1\n# tiny\n2 2\n0 1\n1 0\n".to_vec(), true)]
    #[case(b"P6 640 480 255\n".to_vec(), true)]
    #[case(b"P7\nWIDTH 4\nHEIGHT 4\n".to_vec(), true)]
    #[case(b"P1 roadmap items\n".to_vec(), false)]
    #[case(b"P3hello".to_vec(), false)]
    #[case(b"P5".to_vec(), false)]
    #[case(b"P2   \n".to_vec(), false)]
    fn test_netpbm_lookalikes(#[case] head: Vec<u8>, #[case] is_image: bool) {
        let detection = detect_bytes(&head);
        if is_image {
            assert_eq!(detection.mime, "image/x-portable-anymap");
            assert_eq!(detection.kind, MediaKind::Image);
        } else {
            assert_eq!(detection.mime, OCTET_STREAM);
            assert_eq!(detection.kind, MediaKind::Unknown);
        }
    }

    #[test]
    fn test_misleading_extension_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holiday.txt");
        std::fs::write(&path, encoded(image::ImageFormat::Jpeg)).unwrap();

        let detection = detect(&path).unwrap();
        assert_eq!(detection.mime, "image/jpeg");
        assert_eq!(detection.kind, MediaKind::Image);
    }

    #[test]
    fn test_missing_extension_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip");
        std::fs::write(&path, ftyp(b"isom")).unwrap();
        assert_eq!(detect(&path).unwrap().mime, "video/mp4");
    }
}
