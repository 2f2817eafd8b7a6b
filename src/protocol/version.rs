use crate::VncError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// All supported vnc versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum VncVersion {
    RFB33,
    RFB37,
    RFB38,
}

impl From<[u8; 12]> for VncVersion {
    fn from(version: [u8; 12]) -> Self {
        match &version {
            b"RFB 003.003\n" => VncVersion::RFB33,
            b"RFB 003.007\n" => VncVersion::RFB37,
            b"RFB 003.008\n" => VncVersion::RFB38,
            // https://www.rfc-editor.org/rfc/rfc6143#section-7.1.1
            //  Other version numbers are reported by some servers and clients,
            //  but should be interpreted as 3.3 since they do not implement the
            //  different handshake in 3.7 or 3.8.
            _ => VncVersion::RFB33,
        }
    }
}

impl From<VncVersion> for &[u8; 12] {
    fn from(version: VncVersion) -> Self {
        match version {
            VncVersion::RFB33 => b"RFB 003.003\n",
            VncVersion::RFB37 => b"RFB 003.007\n",
            VncVersion::RFB38 => b"RFB 003.008\n",
        }
    }
}

impl VncVersion {
    /// Run the server side of the ProtocolVersion handshake: advertise
    /// `self`, read the 12 bytes announced by the client and settle on the
    /// highest version both ends speak.
    pub(crate) async fn negotiate<S>(self, stream: &mut S) -> Result<Self, VncError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream
            .write_all(&<VncVersion as Into<&[u8; 12]>>::into(self)[..])
            .await?;

        let mut buffer = [0_u8; 12];
        stream.read_exact(&mut buffer).await?;
        let client: VncVersion = buffer.into();
        Ok(self.min(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_strings_round_trip() {
        for version in [VncVersion::RFB33, VncVersion::RFB37, VncVersion::RFB38] {
            let bytes: &[u8; 12] = version.into();
            assert_eq!(VncVersion::from(*bytes), version);
        }
    }

    #[test]
    fn unknown_version_string_means_33() {
        assert_eq!(VncVersion::from(*b"RFB 004.000\n"), VncVersion::RFB33);
        assert_eq!(VncVersion::from(*b"garbage00000"), VncVersion::RFB33);
    }

    #[tokio::test]
    async fn negotiate_picks_highest_common_version() {
        let cases: [(VncVersion, &[u8; 12], VncVersion); 3] = [
            (VncVersion::RFB38, b"RFB 003.008\n", VncVersion::RFB38),
            (VncVersion::RFB38, b"RFB 003.003\n", VncVersion::RFB33),
            (VncVersion::RFB37, b"RFB 003.008\n", VncVersion::RFB37),
        ];
        for (ours, client_bytes, expected) in cases {
            let (mut server, mut client) = tokio::io::duplex(64);
            client.write_all(client_bytes).await.unwrap();
            let negotiated = ours.negotiate(&mut server).await.unwrap();
            assert_eq!(negotiated, expected);

            let mut advertised = [0_u8; 12];
            client.read_exact(&mut advertised).await.unwrap();
            assert_eq!(&advertised, <&[u8; 12]>::from(ours));
        }
    }
}
