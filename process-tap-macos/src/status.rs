//! `OSStatus` formatting.
//!
//! CoreAudio reports most errors as four-character codes packed into an
//! `i32` (`'who?'`, `'nope'`, ...). Classic Carbon errors are small negative
//! numbers and are printed as such.

/// `OSStatus` as returned by CoreAudio.
pub type OsStatus = i32;

pub const NO_ERR: OsStatus = 0;
pub const PARAM_ERR: OsStatus = -50;

/// Render a status as `'abcd'` when all four bytes are printable ASCII.
pub fn fourcc(status: OsStatus) -> Option<String> {
    let bytes = status.to_be_bytes();
    if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        Some(format!("'{}'", String::from_utf8_lossy(&bytes)))
    } else {
        None
    }
}

fn describe(status: OsStatus) -> Option<&'static str> {
    let name = match &status.to_be_bytes() {
        b"stop" => "audio hardware not running",
        b"what" => "unspecified audio hardware error",
        b"who?" => "bad audio object",
        b"!dev" => "bad device",
        b"!obj" => "bad object",
        b"nope" => "illegal operation",
        b"!siz" => "bad property size",
        b"unop" => "unsupported operation",
        b"!hog" => "device unavailable",
        _ => match status {
            PARAM_ERR => "parameter error",
            -4 => "unimplemented",
            _ => return None,
        },
    };
    Some(name)
}

/// `"<context>: illegal operation ('nope', 1852797029)"`.
pub fn osstatus_message(context: &str, status: OsStatus) -> String {
    let code = match fourcc(status) {
        Some(cc) => format!("{}, {}", cc, status),
        None => status.to_string(),
    };
    match describe(status) {
        Some(name) => format!("{}: {} ({})", context, name, code),
        None => format!("{}: OSStatus {}", context, code),
    }
}

/// `Ok` for `noErr`, otherwise the formatted message.
pub fn check(context: &str, status: OsStatus) -> Result<(), String> {
    if status == NO_ERR {
        Ok(())
    } else {
        Err(osstatus_message(context, status))
    }
}

/// Pack a four-character code into a property selector.
pub const fn selector(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}
