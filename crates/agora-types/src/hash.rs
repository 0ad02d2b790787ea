use crate::error::TypesError;
use std::fmt;
use std::str::FromStr;

/// blake3 digest identifying a timelock operation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// First six bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl FromStr for Hash {
    type Err = TypesError;

    /// Accepts 64 hex digits with an optional `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes: [u8; 32] = hex::decode(digits)?
            .try_into()
            .map_err(|bytes: Vec<u8>| TypesError::InvalidHashLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_is_deterministic() {
        let hash = Hash::compute(b"queue");
        assert_eq!(hash, Hash::compute(b"queue"));
        assert_ne!(hash, Hash::compute(b"queue!"));
    }

    #[test]
    fn test_parse_display() {
        let hash = Hash::compute(b"op");
        let parsed: Hash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(Hash::from_str("0x00"), Err(TypesError::InvalidHashLength(1)));
        assert!(Hash::from_str("zz").is_err());
    }

    #[test]
    fn test_short_prefix() {
        assert_eq!(Hash::default().short(), "000000000000");
    }
}
