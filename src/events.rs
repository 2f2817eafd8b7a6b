//! Input events handed from client connections to the animator.
//!
//! Key events report the press and release transitions of a keysym; a held
//! key may auto-repeat as multiple presses. Pointer input is split into
//! movement and click events: the movement for a pointer message is always
//! delivered first, followed by one click event per button whose state
//! changed in that message.

/// An input event received from a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VncEvent {
    /// A key press or release. `sym` is an X11 keysym.
    Key { sym: u32, down: bool },
    /// The pointer moved (or a button changed while stationary).
    /// `buttons` is the full button bitmask of the reporting message.
    PointerMove { x: i32, y: i32, buttons: u8 },
    /// A single button transition, synthesised by diffing the button mask
    /// of successive pointer messages. `button` is the bit index.
    PointerClick { x: i32, y: i32, button: u8, down: bool },
}
