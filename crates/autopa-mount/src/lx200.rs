//! LX200 command codec
//!
//! Commands are ASCII, framed as `:<body>#`. Replies are terminated by `#`.
//! Motion commands (`:MAZ`, `:MAL`, `:Q`) produce no reply.
//!
//! Status reply (`:GX#`) layout used here:
//! - field 0: mount state name
//! - field 1: motion flags, position 3 = azimuth, position 4 = altitude,
//!   `-` means the axis is idle

use bytes::{Buf, BytesMut};

use autopa_core::{Axis, MountError};

/// Reply terminator
pub const REPLY_TERMINATOR: u8 = b'#';

/// Upper bound on a buffered reply before the stream is considered corrupt
pub const MAX_REPLY_LEN: usize = 256;

/// Product-name fragment identifying OpenAstroTracker firmware
pub const OAT_PRODUCT_TAG: &str = "OpenAstro";

/// Supported LX200 commands
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    /// `:GVP#` product name
    ProductName,
    /// `:GR#` right ascension
    GetRa,
    /// `:GD#` declination
    GetDec,
    /// `:GX#` full status
    GetStatus,
    /// `:MAZ+0.00#` relative azimuth move in arcminutes
    MoveAzimuth(f64),
    /// `:MAL+0.00#` relative altitude move in arcminutes
    MoveAltitude(f64),
    /// `:Q#` stop all motion
    StopAll,
}

impl Command {
    /// Relative move on an axis
    pub fn jog(axis: Axis, arcminutes: f64) -> Self {
        match axis {
            Axis::Azimuth => Command::MoveAzimuth(arcminutes),
            Axis::Altitude => Command::MoveAltitude(arcminutes),
        }
    }

    /// Wire form of the command
    pub fn encode(&self) -> String {
        match self {
            Command::ProductName => ":GVP#".to_string(),
            Command::GetRa => ":GR#".to_string(),
            Command::GetDec => ":GD#".to_string(),
            Command::GetStatus => ":GX#".to_string(),
            Command::MoveAzimuth(arcmin) => format!(":MAZ{:+.2}#", arcmin),
            Command::MoveAltitude(arcmin) => format!(":MAL{:+.2}#", arcmin),
            Command::StopAll => ":Q#".to_string(),
        }
    }

    /// Whether the firmware answers this command
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Command::MoveAzimuth(_) | Command::MoveAltitude(_) | Command::StopAll
        )
    }
}

/// Take one complete reply (without terminator) off the front of `buf`
pub fn take_reply(buf: &mut BytesMut) -> Result<Option<String>, MountError> {
    match buf.iter().position(|&b| b == REPLY_TERMINATOR) {
        Some(end) => {
            let reply = buf.split_to(end);
            buf.advance(1);
            let text = String::from_utf8_lossy(&reply).trim().to_string();
            Ok(Some(text))
        }
        None if buf.len() > MAX_REPLY_LEN => {
            buf.clear();
            Err(MountError::Protocol(format!(
                "reply exceeds {} bytes without terminator",
                MAX_REPLY_LEN
            )))
        }
        None => Ok(None),
    }
}

fn protocol(what: &str, input: &str) -> MountError {
    MountError::Protocol(format!("cannot parse {} from {:?}", what, input))
}

fn parse_number<T: std::str::FromStr>(s: &str, what: &str, input: &str) -> Result<T, MountError> {
    s.trim().parse().map_err(|_| protocol(what, input))
}

/// Parse right ascension in hours from `HH:MM:SS[.ss]` or decimal hours
pub fn parse_ra(input: &str) -> Result<f64, MountError> {
    let trimmed = input.trim();
    let parts: Vec<&str> = trimmed.split(':').collect();

    let hours = if parts.len() == 3 {
        let h: u32 = parse_number(parts[0], "RA hours", input)?;
        let m: u32 = parse_number(parts[1], "RA minutes", input)?;
        let s: f64 = parse_number(parts[2], "RA seconds", input)?;
        if m >= 60 || !(0.0..60.0).contains(&s) {
            return Err(protocol("RA", input));
        }
        f64::from(h) + f64::from(m) / 60.0 + s / 3600.0
    } else {
        parse_number(trimmed, "RA", input)?
    };

    if !(0.0..=24.0).contains(&hours) {
        return Err(protocol("RA", input));
    }
    Ok(hours)
}

/// Parse declination in degrees from `sDD*MM:SS`, `sDD:MM[:SS]`, `sDD*MM'SS"` or decimal degrees
pub fn parse_dec(input: &str) -> Result<f64, MountError> {
    let trimmed = input.trim();
    let (sign, body) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        Some(_) => (1.0, trimmed),
        None => return Err(protocol("DEC", input)),
    };

    let normalized = body.replace(['*', '\'', '\u{df}'], ":").replace('"', "");
    let parts: Vec<&str> = normalized
        .split(':')
        .filter(|p| !p.is_empty())
        .collect();

    let degrees = if parts.len() >= 2 {
        let d: u32 = parse_number(parts[0], "DEC degrees", input)?;
        let m: u32 = parse_number(parts[1], "DEC minutes", input)?;
        let s: f64 = match parts.get(2) {
            Some(p) => parse_number(p, "DEC seconds", input)?,
            None => 0.0,
        };
        if m >= 60 || !(0.0..60.0).contains(&s) {
            return Err(protocol("DEC", input));
        }
        f64::from(d) + f64::from(m) / 60.0 + s / 3600.0
    } else {
        parse_number(&normalized, "DEC", input)?
    };

    let value = sign * degrees;
    if !(-90.0..=90.0).contains(&value) {
        return Err(protocol("DEC", input));
    }
    Ok(value)
}

/// Parsed `:GX#` reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountStatus {
    pub state: String,
    pub tracking: bool,
    pub az_moving: bool,
    pub alt_moving: bool,
}

impl MountStatus {
    pub fn parse(input: &str) -> Result<Self, MountError> {
        let mut fields = input.split(',');
        let state = fields.next().unwrap_or_default().trim().to_string();
        let motion: Vec<char> = fields
            .next()
            .ok_or_else(|| protocol("status motion flags", input))?
            .chars()
            .collect();

        if state.is_empty() || motion.len() < 5 {
            return Err(protocol("status", input));
        }

        Ok(MountStatus {
            state,
            tracking: motion[2] != '-',
            az_moving: motion[3] != '-',
            alt_moving: motion[4] != '-',
        })
    }

    pub fn is_moving(&self, axis: Axis) -> bool {
        match axis {
            Axis::Azimuth => self.az_moving,
            Axis::Altitude => self.alt_moving,
        }
    }
}
