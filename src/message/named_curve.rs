use nom::number::complete::be_u16;
use nom::IResult;

/// Elliptic curves for ECDHE key exchange (RFC 8422).
///
/// Identifies the named curve used for Elliptic Curve Diffie-Hellman
/// Ephemeral key agreement. Key generation is supported for X25519, P-256,
/// P-384 and P-521; other registry values round-trip through
/// [`NamedCurve::Unknown`] so they can be echoed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedCurve {
    /// secp256r1 / P-256.
    Secp256r1,
    /// secp384r1 / P-384.
    Secp384r1,
    /// secp521r1 / P-521.
    Secp521r1,
    /// X25519 (Curve25519 for ECDHE).
    X25519,
    /// Unknown or unsupported curve.
    Unknown(u16),
}

impl NamedCurve {
    /// Convert a wire format u16 value to a `NamedCurve`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            23 => NamedCurve::Secp256r1,
            24 => NamedCurve::Secp384r1,
            25 => NamedCurve::Secp521r1,
            29 => NamedCurve::X25519,
            _ => NamedCurve::Unknown(value),
        }
    }

    /// Convert this `NamedCurve` to its wire format u16 value.
    pub fn as_u16(&self) -> u16 {
        match self {
            NamedCurve::Secp256r1 => 23,
            NamedCurve::Secp384r1 => 24,
            NamedCurve::Secp521r1 => 25,
            NamedCurve::X25519 => 29,
            NamedCurve::Unknown(value) => *value,
        }
    }

    /// Whether keypair generation is available for this curve.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            NamedCurve::Secp256r1
                | NamedCurve::Secp384r1
                | NamedCurve::Secp521r1
                | NamedCurve::X25519
        )
    }

    /// Parse a named curve from wire format.
    pub fn parse(input: &[u8]) -> IResult<&[u8], NamedCurve> {
        let (input, value) = be_u16(input)?;
        Ok((input, NamedCurve::from_u16(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_round_trip() {
        for value in [23, 24, 25, 29, 0x1234] {
            assert_eq!(NamedCurve::from_u16(value).as_u16(), value);
        }
    }

    #[test]
    fn parse_named_curve() {
        let (rest, curve) = NamedCurve::parse(&[0x00, 0x1d, 0xff]).unwrap();
        assert_eq!(curve, NamedCurve::X25519);
        assert_eq!(rest, &[0xff]);
    }

    #[test]
    fn supported_curves() {
        assert!(NamedCurve::Secp256r1.is_supported());
        assert!(NamedCurve::Secp384r1.is_supported());
        assert!(NamedCurve::Secp521r1.is_supported());
        assert!(NamedCurve::X25519.is_supported());
        assert!(!NamedCurve::Unknown(22).is_supported());
    }
}
