/// Encodings and pseudo-encodings the server understands.
///
/// Pixel data is only ever sent Raw; the pseudo entries are capability
/// flags a client advertises through SetEncodings. Anything else on the
/// wire is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum VncEncoding {
    Raw = 0,
    CopyRect = 1,
    DesktopSizePseudo = -223,
    DesktopNamePseudo = -307,
}

impl VncEncoding {
    /// Decode a wire value, `None` for encodings this server does not know.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(VncEncoding::Raw),
            1 => Some(VncEncoding::CopyRect),
            -223 => Some(VncEncoding::DesktopSizePseudo),
            -307 => Some(VncEncoding::DesktopNamePseudo),
            _ => None,
        }
    }
}

impl From<VncEncoding> for i32 {
    fn from(e: VncEncoding) -> Self {
        e as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_round_trip() {
        for encoding in [
            VncEncoding::Raw,
            VncEncoding::CopyRect,
            VncEncoding::DesktopSizePseudo,
            VncEncoding::DesktopNamePseudo,
        ] {
            assert_eq!(VncEncoding::from_wire(i32::from(encoding)), Some(encoding));
        }
    }

    #[test]
    fn unknown_encodings_are_ignored() {
        assert_eq!(VncEncoding::from_wire(7), None);
        assert_eq!(VncEncoding::from_wire(16), None);
        assert_eq!(VncEncoding::from_wire(-239), None);
    }
}
