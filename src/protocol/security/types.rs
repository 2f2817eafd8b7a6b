use crate::{VncError, VncVersion};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Security types from RFC 6143 section 7.1.2.
///
/// This server only ever offers `None` and `VncAuth`; everything else a
/// client could name is rejected during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SecurityType {
    Invalid = 0,
    None = 1,
    VncAuth = 2,
}

impl TryFrom<u8> for SecurityType {
    type Error = VncError;
    fn try_from(num: u8) -> Result<Self, Self::Error> {
        match num {
            0 => Ok(SecurityType::Invalid),
            1 => Ok(SecurityType::None),
            2 => Ok(SecurityType::VncAuth),
            invalid => Err(VncError::Protocol(format!(
                "unsupported security type {invalid}"
            ))),
        }
    }
}

impl From<SecurityType> for u8 {
    fn from(e: SecurityType) -> Self {
        e as u8
    }
}

impl SecurityType {
    /// Server side of the security handshake: offer `types` and return the
    /// client's selection.
    ///
    /// For protocol 3.3 there is no negotiation; the server decides alone
    /// and announces its choice as a single word:
    ///
    /// ```text
    ///            +--------------+--------------+---------------+
    ///            | No. of bytes | Type [Value] | Description   |
    ///            +--------------+--------------+---------------+
    ///            | 4            | U32          | security-type |
    ///            +--------------+--------------+---------------+
    /// ```
    ///
    /// From 3.7 on the server sends the list and the client picks:
    ///
    /// ```text
    /// +--------------------------+-------------+--------------------------+
    /// | No. of bytes             | Type        | Description              |
    /// |                          | [Value]     |                          |
    /// +--------------------------+-------------+--------------------------+
    /// | 1                        | U8          | number-of-security-types |
    /// | number-of-security-types | U8 array    | security-types           |
    /// +--------------------------+-------------+--------------------------+
    /// ```
    pub(crate) async fn negotiate<S>(
        types: &[SecurityType],
        version: VncVersion,
        stream: &mut S,
    ) -> Result<SecurityType, VncError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match version {
            VncVersion::RFB33 => {
                let chosen = *types.first().ok_or_else(|| {
                    VncError::Configuration("no security types available".to_string())
                })?;
                stream.write_u32(u32::from(u8::from(chosen))).await?;
                Ok(chosen)
            }
            _ => {
                let mut data = Vec::with_capacity(types.len() + 1);
                data.push(types.len() as u8);
                data.extend(types.iter().map(|t| u8::from(*t)));
                stream.write_all(&data).await?;

                let chosen: SecurityType = stream.read_u8().await?.try_into()?;
                if !types.contains(&chosen) {
                    return Err(VncError::Protocol(format!(
                        "client selected security type {chosen:?} which was not offered"
                    )));
                }
                Ok(chosen)
            }
        }
    }
}

/// Result word of the SecurityResult handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AuthResult {
    Ok = 0,
    Failed = 1,
}

impl From<AuthResult> for u32 {
    fn from(e: AuthResult) -> Self {
        e as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    #[tokio::test]
    async fn negotiate_offers_list_and_reads_choice() {
        let (mut server, mut client) = tokio::io::duplex(64);
        client.write_all(&[2]).await.unwrap();
        let chosen = SecurityType::negotiate(
            &[SecurityType::VncAuth],
            VncVersion::RFB38,
            &mut server,
        )
        .await
        .unwrap();
        assert_eq!(chosen, SecurityType::VncAuth);

        let mut offered = [0_u8; 2];
        client.read_exact(&mut offered).await.unwrap();
        assert_eq!(offered, [1, 2]);
    }

    #[tokio::test]
    async fn negotiate_rejects_unoffered_choice() {
        let (mut server, mut client) = tokio::io::duplex(64);
        client.write_all(&[1]).await.unwrap();
        let result = SecurityType::negotiate(
            &[SecurityType::VncAuth],
            VncVersion::RFB38,
            &mut server,
        )
        .await;
        assert!(matches!(result, Err(VncError::Protocol(_))));
    }

    #[tokio::test]
    async fn negotiate_33_announces_the_decision() {
        let (mut server, mut client) = tokio::io::duplex(64);
        let chosen = SecurityType::negotiate(
            &[SecurityType::None],
            VncVersion::RFB33,
            &mut server,
        )
        .await
        .unwrap();
        assert_eq!(chosen, SecurityType::None);
        assert_eq!(client.read_u32().await.unwrap(), 1);
    }
}
