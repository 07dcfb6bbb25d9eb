//! Source blobs for tests. Only the magic bytes matter to the fakes.

#[allow(dead_code)]
pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

#[allow(dead_code)]
pub fn opaque_png() -> Vec<u8> {
    [PNG_MAGIC, b"opaque pixels"].concat()
}

#[allow(dead_code)]
pub fn transparent_png() -> Vec<u8> {
    [PNG_MAGIC, b"alpha pixels"].concat()
}

#[allow(dead_code)]
pub fn jpeg() -> Vec<u8> {
    b"\xff\xd8\xff\xe0\0\x10JFIF\0 photo".to_vec()
}

#[allow(dead_code)]
pub fn rotated_jpeg() -> Vec<u8> {
    b"\xff\xd8\xff\xe1\0\x10Exif\0 rotated photo".to_vec()
}

#[allow(dead_code)]
pub fn pdf() -> Vec<u8> {
    b"%PDF-1.7\n1 0 obj\nendobj\n".to_vec()
}

#[allow(dead_code)]
pub fn text() -> Vec<u8> {
    b"just some notes, not an image".to_vec()
}
