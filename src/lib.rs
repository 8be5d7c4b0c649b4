//! Host-side driver for the Pegasus Mobile NoteTaker M210: a pen-input
//! tablet exposing two USB HID interfaces. This crate implements the
//! device protocol engine - framing, commands, the session state machine
//! and the note-stream decoder - plus a small SVG renderer for decoded
//! notes. USB discovery and the command-line front-end are thin
//! consumers of the library built on top.

pub mod commands;
pub mod device;
pub mod error;
pub mod framing;
pub mod note;
pub mod session;
pub mod svg;

pub use commands::Command;
pub use device::{Device, DeviceConfig};
pub use error::{M210Error, Result};
pub use framing::Transport;
pub use note::{Coord, Note, NoteState, Path};
pub use session::{DeviceInfo, Session, SessionConfig};
