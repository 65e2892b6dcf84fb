//! Front listener for player connections.
//!
//! ```text
//! Player -> Listener -> Handshake -> ConnectionGate -> LimboSelector -> Backend
//!                                         |
//!                              login-disconnect frame
//! ```

mod frame;
mod listener;

pub use frame::{
    login_disconnect, parse_login_disconnect, read_frame, read_varint, write_varint, Frame,
    FrameError, Handshake, STATE_LOGIN, STATE_STATUS, STATE_TRANSFER,
};
pub use listener::{Listener, ListenerConfig, ListenerStats};
