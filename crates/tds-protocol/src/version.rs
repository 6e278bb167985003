//! Protocol and server version numbers.

use std::fmt;

/// TDS protocol version, as carried in LOGIN7 and LOGINACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TdsVersion(u32);

impl TdsVersion {
    /// TDS 7.1 (SQL Server 2000).
    pub const V7_1: Self = Self(0x7100_0000);
    /// TDS 7.2 (SQL Server 2005).
    pub const V7_2: Self = Self(0x7209_0002);
    /// TDS 7.3A (SQL Server 2008).
    pub const V7_3A: Self = Self(0x730A_0003);
    /// TDS 7.3B (SQL Server 2008 R2).
    pub const V7_3B: Self = Self(0x730B_0003);
    /// TDS 7.4 (SQL Server 2012 and later).
    pub const V7_4: Self = Self(0x7400_0004);

    /// Wrap a raw version value.
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    /// Raw version value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether DATE, TIME, DATETIME2 and DATETIMEOFFSET are available.
    #[must_use]
    pub const fn supports_date_time_types(self) -> bool {
        self.0 >= Self::V7_3A.0
    }

    /// Major version (the high nibble of the first byte).
    #[must_use]
    pub const fn major(self) -> u8 {
        (self.0 >> 28) as u8
    }

    /// Minor version (the low nibble of the first byte).
    #[must_use]
    pub const fn minor(self) -> u8 {
        ((self.0 >> 24) & 0x0F) as u8
    }
}

impl Default for TdsVersion {
    fn default() -> Self {
        Self::V7_4
    }
}

impl fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V7_3A => write!(f, "TDS 7.3A"),
            Self::V7_3B => write!(f, "TDS 7.3B"),
            _ => write!(f, "TDS {}.{}", self.major(), self.minor()),
        }
    }
}

/// SQL Server product version from a PRELOGIN response or LOGINACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SqlServerVersion {
    /// Major version (16 for SQL Server 2022).
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Build number.
    pub build: u16,
}

impl SqlServerVersion {
    /// Decode the packed form used by LOGINACK: major, minor, build (BE).
    #[must_use]
    pub const fn from_packed(raw: u32) -> Self {
        Self {
            major: (raw >> 24) as u8,
            minor: (raw >> 16) as u8,
            build: raw as u16,
        }
    }

    /// Product name for the major version.
    #[must_use]
    pub const fn product_name(&self) -> &'static str {
        match self.major {
            9 => "SQL Server 2005",
            10 => "SQL Server 2008",
            11 => "SQL Server 2012",
            12 => "SQL Server 2014",
            13 => "SQL Server 2016",
            14 => "SQL Server 2017",
            15 => "SQL Server 2019",
            16 => "SQL Server 2022",
            _ => "SQL Server",
        }
    }
}

impl fmt::Display for SqlServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_ordering() {
        assert!(TdsVersion::V7_4 > TdsVersion::V7_3B);
        assert!(TdsVersion::V7_3B > TdsVersion::V7_3A);
        assert!(TdsVersion::V7_3A > TdsVersion::V7_2);
        assert!(!TdsVersion::V7_2.supports_date_time_types());
        assert!(TdsVersion::V7_4.supports_date_time_types());
    }

    #[test]
    fn test_display() {
        assert_eq!(TdsVersion::V7_4.to_string(), "TDS 7.4");
        assert_eq!(TdsVersion::V7_3B.to_string(), "TDS 7.3B");
        assert_eq!(TdsVersion::V7_1.to_string(), "TDS 7.1");
    }

    #[test]
    fn test_packed_server_version() {
        let v = SqlServerVersion::from_packed(0x1000_1004);
        assert_eq!(v.major, 16);
        assert_eq!(v.minor, 0);
        assert_eq!(v.build, 0x1004);
        assert_eq!(v.product_name(), "SQL Server 2022");
        assert_eq!(v.to_string(), "16.0.4100");
    }
}
