//! The client-to-server messages of RFC 6143 section 7.5, and the pieces of
//! the server-to-client stream that are not plain pixel rectangles.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::pixel_format::PixelFormat;
use super::rect::Rect;
use crate::VncError;

/// Upper bound for client cut text; anything larger is treated as a
/// protocol violation rather than an allocation request.
const MAX_CUT_TEXT_LEN: u32 = 1 << 20;

/// A message received from a connected client.
#[derive(Debug)]
pub enum ClientMsg {
    SetPixelFormat(PixelFormat),
    /// The raw encoding list, in the client's order of preference.
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest {
        incremental: bool,
        rect: Rect,
    },
    KeyEvent {
        down: bool,
        sym: u32,
    },
    PointerEvent {
        buttons: u8,
        x: u16,
        y: u16,
    },
    ClientCutText(String),
}

impl ClientMsg {
    /// Read the message whose type byte `msgtype` has already been consumed.
    ///
    /// The payload is read completely before returning, so a failed
    /// dispatch never leaves half a message on the stream; a short read is
    /// the connection ending.
    pub(crate) async fn read<S>(msgtype: u8, stream: &mut S) -> Result<Self, VncError>
    where
        S: AsyncRead + Unpin,
    {
        match msgtype {
            // SetPixelFormat: 3 bytes padding, 16 bytes format
            0 => {
                let mut payload = [0_u8; 19];
                stream.read_exact(&mut payload).await?;
                let mut raw = [0_u8; 16];
                raw.copy_from_slice(&payload[3..]);
                Ok(ClientMsg::SetPixelFormat(raw.try_into()?))
            }
            // SetEncodings: 1 byte padding, u16 count, count * i32
            2 => {
                let mut head = [0_u8; 3];
                stream.read_exact(&mut head).await?;
                let count = u16::from_be_bytes([head[1], head[2]]);
                let mut encodings = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    encodings.push(stream.read_i32().await?);
                }
                Ok(ClientMsg::SetEncodings(encodings))
            }
            // FramebufferUpdateRequest: incremental flag and the region
            3 => {
                let incremental = stream.read_u8().await? != 0;
                let x = stream.read_u16().await?;
                let y = stream.read_u16().await?;
                let width = stream.read_u16().await?;
                let height = stream.read_u16().await?;
                Ok(ClientMsg::FramebufferUpdateRequest {
                    incremental,
                    rect: Rect::new(x, y, width, height),
                })
            }
            // KeyEvent: down flag, 2 bytes padding, keysym
            4 => {
                let down = stream.read_u8().await? != 0;
                let mut padding = [0_u8; 2];
                stream.read_exact(&mut padding).await?;
                let sym = stream.read_u32().await?;
                Ok(ClientMsg::KeyEvent { down, sym })
            }
            // PointerEvent: button mask and position
            5 => {
                let buttons = stream.read_u8().await?;
                let x = stream.read_u16().await?;
                let y = stream.read_u16().await?;
                Ok(ClientMsg::PointerEvent { buttons, x, y })
            }
            // ClientCutText: 3 bytes padding, u32 length, text
            6 => {
                let mut padding = [0_u8; 3];
                stream.read_exact(&mut padding).await?;
                let len = stream.read_u32().await?;
                if len > MAX_CUT_TEXT_LEN {
                    return Err(VncError::Protocol(format!(
                        "client cut text of {len} bytes exceeds the limit"
                    )));
                }
                let mut text = vec![0_u8; len as usize];
                stream.read_exact(&mut text).await?;
                Ok(ClientMsg::ClientCutText(
                    String::from_utf8_lossy(&text).into_owned(),
                ))
            }
            other => Err(VncError::Protocol(format!(
                "unrecognised client message type {other}"
            ))),
        }
    }
}

/// The ServerInit message of RFC 6143 section 7.3.2: the framebuffer
/// geometry, the server's native pixel format and the desktop name.
#[derive(Debug, Clone)]
pub struct ServerInit {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name: String,
}

impl ServerInit {
    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        self.pixel_format.write_to(buf);
        put_string(buf, &self.name);
    }
}

/// Append a u32-length-prefixed string, the shape RFB uses for the desktop
/// name and for failure reason strings.
pub(crate) fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32(value.len() as u32);
    buf.put_slice(value.as_bytes());
}
