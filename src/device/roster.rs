//! Parsing of the `ldconsole list2` emulator roster.
//!
//! Each non-empty line looks like
//! `index,title,top-window-handle,bind-window-handle,running,pid,vbox-pid,...`
//! where the fifth field is `1` for a running instance.

use super::types::Device;

/// Decode console output, UTF-8 first then code page 950.
pub fn decode_console_output(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _, had_errors) = encoding_rs::BIG5.decode(bytes);
            if had_errors {
                log::debug!("list2 output is neither valid UTF-8 nor Big5, decoded lossily");
            }
            text.into_owned()
        }
    }
}

/// Parse a single roster line. Returns `None` for blank, short or
/// non-numeric records.
pub fn parse_roster_line(line: &str) -> Option<Device> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 5 {
        return None;
    }
    let index = parts[0].trim().parse::<u32>().ok()?;
    let name = parts[1].trim().to_string();
    let running = parts[4].trim() == "1";
    Some(Device::new(index, name, running))
}

pub fn parse_roster(output: &str) -> Vec<Device> {
    output.lines().filter_map(parse_roster_line).collect()
}
