//! Image container formats and byte sniffing.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;

/// Type identifier reported for data whose format is unknown.
pub const GENERIC_IMAGE_TYPE: &str = "public.image";

/// Encoded image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageFormat {
    /// Unknown or unsupported data.
    #[default]
    Undefined,
    /// JPEG / JFIF.
    Jpeg,
    /// Portable Network Graphics.
    Png,
    /// Graphics Interchange Format.
    Gif,
    /// Tagged Image File Format.
    Tiff,
    /// `WebP` (RIFF container).
    WebP,
    /// HEIC (ISO-BMFF, HEVC brands).
    Heic,
    /// HEIF (ISO-BMFF, image sequence brands).
    Heif,
    /// A format registered at runtime with [`register_custom_format`].
    Custom(u32),
}

type Sniffer = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

struct CustomFormat {
    id: u32,
    type_identifier: String,
    sniffer: Sniffer,
}

static CUSTOM_FORMATS: LazyLock<RwLock<Vec<CustomFormat>>> =
    LazyLock::new(|| RwLock::new(Vec::new()));

/// Registers an external format. The sniffer is only consulted when none
/// of the builtin signatures match. Registering an existing id replaces it.
pub fn register_custom_format<F>(
    id: u32,
    type_identifier: impl Into<String>,
    sniffer: F,
) -> ImageFormat
where
    F: Fn(&[u8]) -> bool + Send + Sync + 'static,
{
    let mut formats = CUSTOM_FORMATS.write();
    formats.retain(|f| f.id != id);
    formats.push(CustomFormat {
        id,
        type_identifier: type_identifier.into(),
        sniffer: Arc::new(sniffer),
    });
    ImageFormat::Custom(id)
}

/// Removes a previously registered external format.
pub fn unregister_custom_format(id: u32) {
    CUSTOM_FORMATS.write().retain(|f| f.id != id);
}

impl ImageFormat {
    /// Sniffs the leading bytes of `data`.
    ///
    /// Empty or truncated input yields [`ImageFormat::Undefined`].
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        if let Some(format) = Self::sniff_builtin(data) {
            return format;
        }
        if data.is_empty() {
            return Self::Undefined;
        }
        let formats = CUSTOM_FORMATS.read();
        formats
            .iter()
            .rev()
            .find(|f| (f.sniffer)(data))
            .map_or(Self::Undefined, |f| Self::Custom(f.id))
    }

    fn sniff_builtin(data: &[u8]) -> Option<Self> {
        match data {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [b'G', b'I', b'F', ..] => Some(Self::Gif),
            [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => Some(Self::Tiff),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::WebP),
            [_, _, _, _, b'f', b't', b'y', b'p', b0, b1, b2, b3, ..] => {
                match &[*b0, *b1, *b2, *b3] {
                    b"heic" | b"heix" | b"hevc" | b"hevx" => Some(Self::Heic),
                    b"heif" | b"mif1" | b"msf1" => Some(Self::Heif),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Returns the uniform type identifier for this format.
    #[must_use]
    pub fn type_identifier(self) -> Cow<'static, str> {
        let uti = match self {
            Self::Undefined => GENERIC_IMAGE_TYPE,
            Self::Jpeg => "public.jpeg",
            Self::Png => "public.png",
            Self::Gif => "com.compuserve.gif",
            Self::Tiff => "public.tiff",
            Self::WebP => "org.webmproject.webp",
            Self::Heic => "public.heic",
            Self::Heif => "public.heif",
            Self::Custom(id) => {
                let formats = CUSTOM_FORMATS.read();
                return formats
                    .iter()
                    .find(|f| f.id == id)
                    .map_or(Cow::Borrowed(GENERIC_IMAGE_TYPE), |f| {
                        Cow::Owned(f.type_identifier.clone())
                    });
            }
        };
        Cow::Borrowed(uti)
    }

    /// Maps a uniform type identifier back to a format.
    #[must_use]
    pub fn from_type_identifier(uti: &str) -> Self {
        match uti {
            "public.jpeg" => Self::Jpeg,
            "public.png" => Self::Png,
            "com.compuserve.gif" => Self::Gif,
            "public.tiff" => Self::Tiff,
            "org.webmproject.webp" => Self::WebP,
            "public.heic" => Self::Heic,
            "public.heif" => Self::Heif,
            other => CUSTOM_FORMATS
                .read()
                .iter()
                .find(|f| f.type_identifier == other)
                .map_or(Self::Undefined, |f| Self::Custom(f.id)),
        }
    }

    /// Returns the MIME type, if the format has a well-known one.
    #[must_use]
    pub const fn mime_type(self) -> Option<&'static str> {
        match self {
            Self::Jpeg => Some("image/jpeg"),
            Self::Png => Some("image/png"),
            Self::Gif => Some("image/gif"),
            Self::Tiff => Some("image/tiff"),
            Self::WebP => Some("image/webp"),
            Self::Heic => Some("image/heic"),
            Self::Heif => Some("image/heif"),
            Self::Undefined | Self::Custom(_) => None,
        }
    }

    /// Returns the canonical file extension.
    #[must_use]
    pub const fn extension(self) -> Option<&'static str> {
        match self {
            Self::Jpeg => Some("jpg"),
            Self::Png => Some("png"),
            Self::Gif => Some("gif"),
            Self::Tiff => Some("tiff"),
            Self::WebP => Some("webp"),
            Self::Heic => Some("heic"),
            Self::Heif => Some("heif"),
            Self::Undefined | Self::Custom(_) => None,
        }
    }

    /// Resolves a file extension (case-insensitive, without dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "jpe" | "jfif" => Self::Jpeg,
            "png" => Self::Png,
            "gif" => Self::Gif,
            "tif" | "tiff" => Self::Tiff,
            "webp" => Self::WebP,
            "heic" => Self::Heic,
            "heif" => Self::Heif,
            _ => Self::Undefined,
        }
    }

    /// Returns the matching `image` crate format, if it can handle it.
    #[must_use]
    pub const fn to_image_format(self) -> Option<image::ImageFormat> {
        match self {
            Self::Jpeg => Some(image::ImageFormat::Jpeg),
            Self::Png => Some(image::ImageFormat::Png),
            Self::Gif => Some(image::ImageFormat::Gif),
            Self::Tiff => Some(image::ImageFormat::Tiff),
            Self::WebP => Some(image::ImageFormat::WebP),
            Self::Heic | Self::Heif | Self::Undefined | Self::Custom(_) => None,
        }
    }

    /// Returns true unless the format is [`ImageFormat::Undefined`].
    #[must_use]
    pub const fn is_defined(self) -> bool {
        !matches!(self, Self::Undefined)
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Png => write!(f, "png"),
            Self::Gif => write!(f, "gif"),
            Self::Tiff => write!(f, "tiff"),
            Self::WebP => write!(f, "webp"),
            Self::Heic => write!(f, "heic"),
            Self::Heif => write!(f, "heif"),
            Self::Custom(id) => write!(f, "custom-{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(&[0xFF, 0xD8, 0xFF, 0xE0], ImageFormat::Jpeg ; "jpeg")]
    #[test_case(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A], ImageFormat::Png ; "png")]
    #[test_case(b"GIF89a", ImageFormat::Gif ; "gif")]
    #[test_case(&[0x49, 0x49, 0x2A, 0x00], ImageFormat::Tiff ; "tiff_little_endian")]
    #[test_case(&[0x4D, 0x4D, 0x00, 0x2A], ImageFormat::Tiff ; "tiff_big_endian")]
    #[test_case(b"RIFF\x10\x00\x00\x00WEBPVP8 ", ImageFormat::WebP ; "webp")]
    #[test_case(b"\x00\x00\x00\x18ftypheic", ImageFormat::Heic ; "heic")]
    #[test_case(b"\x00\x00\x00\x18ftypheif", ImageFormat::Heif ; "heif")]
    #[test_case(b"\x00\x00\x00\x18ftypmif1", ImageFormat::Heif ; "heif_mif1")]
    #[test_case(b"\x00\x00\x00\x18ftypisom", ImageFormat::Undefined ; "mp4_is_not_an_image")]
    #[test_case(b"RIFF\x10\x00\x00\x00WAVE", ImageFormat::Undefined ; "riff_without_webp_brand")]
    #[test_case(&[0xFF, 0xD8], ImageFormat::Undefined ; "truncated_jpeg")]
    #[test_case(&[], ImageFormat::Undefined ; "empty")]
    fn test_detect(data: &[u8], expected: ImageFormat) {
        assert_eq!(ImageFormat::detect(data), expected);
    }

    #[test]
    fn test_type_identifier_round_trip() {
        for format in [
            ImageFormat::Undefined,
            ImageFormat::Jpeg,
            ImageFormat::Png,
            ImageFormat::Gif,
            ImageFormat::Tiff,
            ImageFormat::WebP,
            ImageFormat::Heic,
            ImageFormat::Heif,
        ] {
            let uti = format.type_identifier();
            assert_eq!(ImageFormat::from_type_identifier(&uti), format);
        }
    }

    #[test]
    fn test_custom_format_consulted_after_builtin_table() {
        let custom = register_custom_format(7001, "org.example.bpg", |data| {
            data.starts_with(b"BPG") || data.starts_with(&[0xFF, 0xD8, 0xFF])
        });

        assert_eq!(ImageFormat::detect(b"BPG\xfb"), custom);
        // The builtin JPEG signature still wins.
        assert_eq!(ImageFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE1]), ImageFormat::Jpeg);
        assert_eq!(custom.type_identifier(), "org.example.bpg");
        assert_eq!(ImageFormat::from_type_identifier("org.example.bpg"), custom);

        unregister_custom_format(7001);
        assert_eq!(ImageFormat::detect(b"BPG\xfb"), ImageFormat::Undefined);
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(ImageFormat::from_extension("JPEG"), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_extension("txt"), ImageFormat::Undefined);
        assert_eq!(ImageFormat::Png.extension(), Some("png"));
        assert_eq!(ImageFormat::WebP.mime_type(), Some("image/webp"));
    }
}
