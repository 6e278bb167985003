//! Column collations and the code pages behind them.
//!
//! A collation is five bytes on the wire: a little-endian `u32` holding the
//! LCID in its low 20 bits plus comparison flags, followed by a sort ID.
//! Non-zero sort IDs denote legacy SQL collations, whose code page is fixed
//! by the sort ID rather than the locale.

use bytes::{Buf, BufMut};
use encoding_rs::Encoding;

use crate::error::ProtocolError;

/// Flag marking a `_UTF8` collation.
pub const COLLATION_FLAG_UTF8: u32 = 0x0800_0000;

/// Mask selecting the LCID from the collation info.
pub const LCID_MASK: u32 = 0x000F_FFFF;

/// Code page number for UTF-8.
pub const CODE_PAGE_UTF8: u16 = 65001;

/// Wire size of a collation.
pub const COLLATION_LEN: usize = 5;

/// A SQL Server collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Collation {
    /// LCID and comparison flags.
    pub info: u32,
    /// Legacy sort ID, zero for Windows collations.
    pub sort_id: u8,
}

impl Collation {
    /// `Latin1_General_CI_AS`.
    pub const LATIN1_GENERAL: Self = Self {
        info: 0x00D0_0409,
        sort_id: 0,
    };

    /// Build from raw parts.
    #[must_use]
    pub const fn new(info: u32, sort_id: u8) -> Self {
        Self { info, sort_id }
    }

    /// Read five collation bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < COLLATION_LEN {
            return Err(ProtocolError::UnexpectedEof("collation"));
        }
        Ok(Self {
            info: src.get_u32_le(),
            sort_id: src.get_u8(),
        })
    }

    /// Write five collation bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.info);
        dst.put_u8(self.sort_id);
    }

    /// Locale ID.
    #[must_use]
    pub const fn lcid(&self) -> u32 {
        self.info & LCID_MASK
    }

    /// Whether the column stores UTF-8.
    #[must_use]
    pub const fn is_utf8(&self) -> bool {
        self.info & COLLATION_FLAG_UTF8 != 0
    }

    /// Windows code page of the column's single-byte data.
    #[must_use]
    pub fn code_page(&self) -> Option<u16> {
        if self.is_utf8() {
            Some(CODE_PAGE_UTF8)
        } else if self.sort_id != 0 {
            code_page_for_sort_id(self.sort_id)
        } else {
            code_page_for_lcid(self.lcid())
        }
    }

    /// Encoding for the column's single-byte data, if known.
    #[must_use]
    pub fn encoding(&self) -> Option<&'static Encoding> {
        self.code_page().and_then(encoding_for_code_page)
    }
}

/// Code page for a legacy SQL sort ID.
#[must_use]
pub fn code_page_for_sort_id(sort_id: u8) -> Option<u16> {
    match sort_id {
        50..=54 | 71..=75 | 183..=186 | 210..=217 => Some(1252),
        80..=98 => Some(1250),
        104..=108 => Some(1251),
        112..=114 | 120..=122 | 124 => Some(1253),
        128..=130 => Some(1254),
        136..=138 => Some(1255),
        144..=146 => Some(1256),
        152..=160 => Some(1257),
        192 | 193 | 200 => Some(932),
        194 | 195 => Some(949),
        196 | 197 | 201 | 202 => Some(950),
        198 | 199 | 203 => Some(936),
        204..=206 => Some(874),
        _ => None,
    }
}

/// Code page for a Windows LCID.
#[must_use]
pub fn code_page_for_lcid(lcid: u32) -> Option<u16> {
    let code_page = match lcid & 0xFFFF {
        0x0411 => 932,
        0x0804 | 0x1004 => 936,
        0x0412 => 949,
        0x0404 | 0x0C04 | 0x1404 => 950,
        0x041E => 874,
        0x0405 | 0x0415 | 0x040E | 0x041A | 0x081A | 0x141A | 0x101A | 0x041B | 0x0424
        | 0x0418 | 0x041C => 1250,
        0x0419 | 0x0422 | 0x0423 | 0x0402 | 0x042F | 0x0C1A | 0x201A | 0x0440 | 0x0843
        | 0x0444 | 0x0450 | 0x0485 => 1251,
        0x0408 => 1253,
        0x041F | 0x042C => 1254,
        0x040D => 1255,
        0x0401 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01 | 0x2001 | 0x2401
        | 0x2801 | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 | 0x0429 | 0x0420
        | 0x048C | 0x0463 => 1256,
        0x0425..=0x0427 => 1257,
        0x042A => 1258,
        // Western European locales and anything unrecognised
        0x0000 => return None,
        _ => 1252,
    };
    Some(code_page)
}

/// `encoding_rs` encoding for a Windows code page number.
#[must_use]
pub fn encoding_for_code_page(code_page: u16) -> Option<&'static Encoding> {
    Some(match code_page {
        874 => encoding_rs::WINDOWS_874,
        932 => encoding_rs::SHIFT_JIS,
        936 => encoding_rs::GB18030,
        949 => encoding_rs::EUC_KR,
        950 => encoding_rs::BIG5,
        1250 => encoding_rs::WINDOWS_1250,
        1251 => encoding_rs::WINDOWS_1251,
        1252 => encoding_rs::WINDOWS_1252,
        1253 => encoding_rs::WINDOWS_1253,
        1254 => encoding_rs::WINDOWS_1254,
        1255 => encoding_rs::WINDOWS_1255,
        1256 => encoding_rs::WINDOWS_1256,
        1257 => encoding_rs::WINDOWS_1257,
        1258 => encoding_rs::WINDOWS_1258,
        CODE_PAGE_UTF8 => encoding_rs::UTF_8,
        _ => return None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_collation() {
        let raw = [0x09, 0x04, 0xD0, 0x00, 0x34];
        let collation = Collation::decode(&mut &raw[..]).unwrap();
        assert_eq!(collation.lcid(), 0x0409);
        assert_eq!(collation.sort_id, 52);
        assert_eq!(collation.code_page(), Some(1252));
    }

    #[test]
    fn test_utf8_flag() {
        let collation = Collation::new(0x0800_0409, 0);
        assert!(collation.is_utf8());
        assert_eq!(collation.encoding().unwrap().name(), "UTF-8");
    }

    #[test]
    fn test_sort_id_wins_over_lcid() {
        let collation = Collation::new(0x0411, 104);
        assert_eq!(collation.code_page(), Some(1251));
    }

    #[test]
    fn test_lcid_encodings() {
        let cases = [
            (0x0411, "Shift_JIS"),
            (0x0804, "gb18030"),
            (0x0404, "Big5"),
            (0x0412, "EUC-KR"),
            (0x0419, "windows-1251"),
            (0x0408, "windows-1253"),
            (0x0425, "windows-1257"),
            (0x0409, "windows-1252"),
        ];
        for (lcid, name) in cases {
            let encoding = Collation::new(lcid, 0).encoding().unwrap();
            assert_eq!(encoding.name(), name, "lcid {lcid:#x}");
        }
    }

    #[test]
    fn test_decode_cyrillic_text() {
        let encoding = Collation::new(0x0419, 0).encoding().unwrap();
        let (text, _, had_errors) = encoding.decode(&[0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2]);
        assert!(!had_errors);
        assert_eq!(text, "Привет");
    }

    #[test]
    fn test_unknown_sort_id() {
        assert_eq!(Collation::new(0x0409, 7).encoding(), None);
    }

    #[test]
    fn test_short_collation() {
        assert!(Collation::decode(&mut &[0x09, 0x04][..]).is_err());
    }
}
