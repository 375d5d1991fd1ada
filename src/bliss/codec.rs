//! Wire frames for the Bliss GATT protocol.
//!
//! Commands are written to [`COMMAND_UUID`], the fixture answers with
//! notifications on [`RESPONSE_UUID`]. All multi-byte values are little
//! endian.

use chrono::{Datelike, NaiveDateTime, Timelike};
use uuid::Uuid;

pub const COMMAND_UUID: Uuid = Uuid::from_u128(0x00010405_0405_0607_0809_0a0b0c0d1910);
pub const RESPONSE_UUID: Uuid = Uuid::from_u128(0x00010304_0405_0607_0809_0a0b0c0d1910);

/// Header shared by every command and notification except login.
const FRAME_HEADER: [u8; 4] = [0xFF, 0x78, 0xEA, 0x41];

const LOGIN_PREFIX: [u8; 5] = [0xFF, 0x03, 0x03, 0x03, 0x03];
const SET_CLOCK_PREFIX: [u8; 6] = [0xFF, 0x78, 0xEA, 0x41, 0x02, 0x00];

const OP_SET_LEVEL: u8 = 0xBF;
const OP_RECALL_SCENE: u8 = 0xA5;
const OP_STATUS: u8 = 0xD1;

/// Ask the fixture to report its current level and active scene.
pub const READ_STATUS: [u8; 7] = [0xFF, 0x78, 0xEA, 0x41, OP_STATUS, 0x03, 0x01];

/// Login frame: the pairing password as exactly six bytes, zero padded.
pub fn build_login(password: &str) -> Vec<u8> {
    let mut payload = password.as_bytes().to_vec();
    payload.resize(6, 0x00);

    let mut frame = LOGIN_PREFIX.to_vec();
    frame.extend_from_slice(&payload);
    frame
}

/// Clock sync frame. The fixture stores years as an offset from 2000.
pub fn build_set_clock(now: NaiveDateTime) -> Vec<u8> {
    let mut frame = SET_CLOCK_PREFIX.to_vec();
    frame.extend_from_slice(&[
        ((now.year() - 2000) & 0xFF) as u8,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    ]);
    frame
}

pub fn build_set_level(level: u16) -> Vec<u8> {
    let mut frame = FRAME_HEADER.to_vec();
    frame.extend_from_slice(&[OP_SET_LEVEL, 0x03]);
    frame.extend_from_slice(&level.to_le_bytes());
    frame
}

pub fn build_recall_scene(index: u8) -> Vec<u8> {
    let mut frame = FRAME_HEADER.to_vec();
    frame.extend_from_slice(&[OP_RECALL_SCENE, 0x03, index]);
    frame
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Notification {
    /// Reply to [`READ_STATUS`]: current level and active scene index.
    Status { level: u16, scene: u8 },

    /// Acknowledgement of a set-level command, echoing the level.
    LevelAck { level: u16 },
}

/// Parse a notification from the response characteristic.
///
/// Frames that are too short, carry a foreign header, or an unknown opcode
/// are ignored.
pub fn parse_notification(data: &[u8]) -> Option<Notification> {
    if data.len() < 9 || data[0..4] != FRAME_HEADER {
        return None;
    }

    let level = u16::from_le_bytes([data[6], data[7]]);

    match data[4] {
        OP_STATUS => Some(Notification::Status {
            level,
            scene: data[8],
        }),
        OP_SET_LEVEL => Some(Notification::LevelAck { level }),
        _ => None,
    }
}

/// Hex-dump a frame for debug logging.
pub fn hex(frame: &[u8]) -> String {
    frame
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
