// Device module - emulator control through the LDPlayer console binaries.
// The automation loop only sees the `DeviceDriver` trait; `LdPlayer` is the
// production implementation that shells out to ld.exe / ldconsole.exe.

pub mod error;
pub mod ldplayer;
pub mod roster;
pub mod types;
pub mod wait;

pub use error::{DriverError, DriverResult};
pub use ldplayer::LdPlayer;
pub use roster::{decode_console_output, parse_roster};
pub use types::{Device, DeviceDriver};
pub use wait::await_condition;
