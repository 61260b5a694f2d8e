//! Correlation identifiers.
//!
//! Every request gets a 128-bit [`CorrelationId`] minted by an
//! [`IdGenerator`]. The id is echoed in the `X-Request-Id` response header
//! and stamped on every log line written for the request.
//!
//! # Layout
//!
//! Time-ordered ids follow the RFC 4122 version 1 layout:
//!
//! ```text
//!  0               4       6       8       10                      16
//! ┌───────────────┬───────┬───────┬───────┬───────────────────────┐
//! │   time_low    │time_mid│ver|hi │var|seq│         node          │
//! └───────────────┴───────┴───────┴───────┴───────────────────────┘
//! ```
//!
//! - 60-bit timestamp: 100 ns ticks since 1582-10-15T00:00:00Z
//! - 4-bit version (`1`)
//! - 14-bit clock sequence, bumped atomically for every id
//! - 2-bit IETF variant
//! - 48-bit node, the host hardware address or a random stand-in
//!
//! The clock sequence lives in the generator, not in a global, so each
//! [`App`](crate::App) owns one and tests can build their own.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use uuid::{Timestamp, Uuid};

pub use uuid::Variant;

/// 100 ns ticks between 1582-10-15T00:00:00Z and 1970-01-01T00:00:00Z.
const GREGORIAN_OFFSET: u64 = 0x01B2_1DD2_1381_4000;

// ── CorrelationId ─────────────────────────────────────────────────────────────

/// A 128-bit request correlation id.
///
/// The all-zero value is the "absent" sentinel: it serializes to JSON `null`
/// and `null` deserializes back to it.
#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// The zero id.
    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Builds an id from a raw slice, which must be exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseIdError> {
        Uuid::from_slice(bytes).map(Self).map_err(|_| ParseIdError::Length(bytes.len()))
    }

    /// A fully random (version 4) id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn version(&self) -> usize {
        self.0.get_version_num()
    }

    pub fn variant(&self) -> Variant {
        self.0.get_variant()
    }

    /// The 48-bit node of a time-ordered id. `None` for any other version.
    pub fn node(&self) -> Option<[u8; 6]> {
        self.gregorian().and_then(|_| self.0.get_node_id())
    }

    /// The 14-bit clock sequence of a time-ordered id.
    pub fn clock_seq(&self) -> Option<u16> {
        self.gregorian().map(|(_, seq)| seq)
    }

    /// Raw 60-bit timestamp in 100 ns ticks since the Gregorian epoch.
    /// Zero for ids that are not time-ordered.
    pub fn timestamp(&self) -> u64 {
        self.gregorian().map_or(0, |(ticks, _)| ticks)
    }

    /// Wall-clock instant a time-ordered id was minted at.
    pub fn time(&self) -> Option<SystemTime> {
        let (ticks, _) = self.gregorian()?;
        if ticks >= GREGORIAN_OFFSET {
            UNIX_EPOCH.checked_add(ticks_to_duration(ticks - GREGORIAN_OFFSET))
        } else {
            UNIX_EPOCH.checked_sub(ticks_to_duration(GREGORIAN_OFFSET - ticks))
        }
    }

    /// Ticks and clock sequence, for version 1 ids only.
    fn gregorian(&self) -> Option<(u64, u16)> {
        if self.version() != 1 {
            return None;
        }
        self.0.get_timestamp().map(|ts| ts.to_gregorian())
    }

    fn pack(ticks: u64, clock_seq: u16, node: [u8; 6]) -> Self {
        Self(Uuid::new_v1(Timestamp::from_gregorian(ticks, clock_seq & 0x3FFF), &node))
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<CorrelationId> for Uuid {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::new(ticks / 10_000_000, (ticks % 10_000_000) as u32 * 100)
}

fn ticks_since_gregorian(at: SystemTime) -> u64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(since) => GREGORIAN_OFFSET + (since.as_nanos() / 100) as u64,
        Err(e) => GREGORIAN_OFFSET.saturating_sub((e.duration().as_nanos() / 100) as u64),
    }
}

/// Canonical `8-4-4-4-12` lowercase hex form.
impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({self})")
    }
}

/// Accepts exactly 32 hex digits (either case), optionally grouped with
/// hyphens at the canonical positions. Braced and `urn:uuid:` forms are
/// rejected.
impl FromStr for CorrelationId {
    type Err = ParseIdError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = input.as_bytes();
        let shaped = match bytes.len() {
            32 => true,
            36 => [8, 13, 18, 23].iter().all(|&at| bytes[at] == b'-'),
            _ => false,
        };
        if !shaped {
            return Err(ParseIdError::Invalid(input.to_owned()));
        }
        Uuid::try_parse(input)
            .map(Self)
            .map_err(|_| ParseIdError::Invalid(input.to_owned()))
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_nil() {
            serializer.serialize_none()
        } else {
            serializer.collect_str(self)
        }
    }
}

impl<'de> Deserialize<'de> for CorrelationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = CorrelationId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a correlation id string, an empty string, 0, or null")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CorrelationId::nil())
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(CorrelationId::nil())
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(IdVisitor)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        if v == 0 {
            Ok(CorrelationId::nil())
        } else {
            Err(E::invalid_value(de::Unexpected::Unsigned(v), &self))
        }
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        if v == 0 {
            Ok(CorrelationId::nil())
        } else {
            Err(E::invalid_value(de::Unexpected::Signed(v), &self))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        if v.is_empty() {
            return Ok(CorrelationId::nil());
        }
        v.parse().map_err(E::custom)
    }
}

/// Failure to build a [`CorrelationId`] from external input.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("invalid correlation id {0:?}")]
    Invalid(String),
    #[error("correlation ids are exactly 16 bytes long, got {0}")]
    Length(usize),
}

// ── IdGenerator ───────────────────────────────────────────────────────────────

/// Mints time-ordered [`CorrelationId`]s.
///
/// One generator is shared by every request an [`App`](crate::App) serves.
/// The clock sequence is the only mutable state and is only ever touched
/// through an atomic fetch-and-add, so `&IdGenerator` is all a request
/// needs.
pub struct IdGenerator {
    clock_seq: AtomicU32,
    node: [u8; 6],
}

impl IdGenerator {
    /// Generator seeded with a random clock sequence, using the host's
    /// hardware address as node when one can be found.
    pub fn new() -> Self {
        let node = hardware_node().unwrap_or_else(random_node);
        Self::with_state(node, rand::random())
    }

    /// Generator with an explicit node and clock-sequence seed.
    pub fn with_state(node: [u8; 6], clock_seq: u16) -> Self {
        Self { clock_seq: AtomicU32::new(u32::from(clock_seq)), node }
    }

    pub fn node(&self) -> [u8; 6] {
        self.node
    }

    /// A fresh id for the current instant.
    pub fn next_id(&self) -> CorrelationId {
        self.id_at(SystemTime::now())
    }

    /// A fresh id for `at`. Two calls never return the same id until the
    /// 14-bit clock sequence wraps.
    pub fn id_at(&self, at: SystemTime) -> CorrelationId {
        let seq = self.clock_seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        CorrelationId::pack(ticks_since_gregorian(at), seq as u16, self.node)
    }

    /// The smallest id this generator could mint for `at`: the clock
    /// sequence is zeroed instead of advanced. Useful as an inclusive lower
    /// bound when ids are used as sortable keys.
    pub fn base_id_at(&self, at: SystemTime) -> CorrelationId {
        CorrelationId::pack(ticks_since_gregorian(at), 0, self.node)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("clock_seq", &self.clock_seq.load(Ordering::Relaxed))
            .field("node", &self.node)
            .finish()
    }
}

/// First non-zero interface address under `/sys/class/net`, in name order.
fn hardware_node() -> Option<[u8; 6]> {
    let mut entries: Vec<_> = std::fs::read_dir("/sys/class/net")
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    entries.sort();

    entries.iter().find_map(|dir| {
        let text = std::fs::read_to_string(dir.join("address")).ok()?;
        parse_mac(text.trim()).filter(|mac| mac.iter().any(|&b| b != 0))
    })
}

fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = text.split(':');
    for slot in &mut mac {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}

/// Random node with the multicast bit set so it can never collide with a
/// real hardware address (RFC 4122 §4.5).
fn random_node() -> [u8; 6] {
    let mut node = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut node);
    node[0] |= 0x01;
    node
}
