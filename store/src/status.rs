//! Record status codes.
//!
//! A status is a small bitmask describing where a record is in its
//! lifecycle. The high bits name the state family (empty, ready, destroyed,
//! busy, error) and the low bits refine it (clean, dirty, new, and the
//! in-flight busy variants).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a record in one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(u16);

impl Status {
    pub const CLEAN: Status = Status(0x0001);
    pub const DIRTY: Status = Status(0x0002);
    pub const EMPTY: Status = Status(0x0100);
    pub const ERROR: Status = Status(0x1000);

    pub const READY: Status = Status(0x0200);
    pub const READY_CLEAN: Status = Status(0x0201);
    pub const READY_DIRTY: Status = Status(0x0202);
    pub const READY_NEW: Status = Status(0x0203);

    pub const DESTROYED: Status = Status(0x0400);
    pub const DESTROYED_CLEAN: Status = Status(0x0401);
    pub const DESTROYED_DIRTY: Status = Status(0x0402);

    pub const BUSY: Status = Status(0x0800);
    pub const BUSY_LOADING: Status = Status(0x0804);
    pub const BUSY_CREATING: Status = Status(0x0808);
    pub const BUSY_COMMITTING: Status = Status(0x0810);
    pub const BUSY_REFRESH: Status = Status(0x0820);
    pub const BUSY_REFRESH_CLEAN: Status = Status(0x0821);
    pub const BUSY_REFRESH_DIRTY: Status = Status(0x0822);
    pub const BUSY_DESTROYING: Status = Status(0x0840);

    /// Build a status from raw bits.
    pub const fn from_bits(bits: u16) -> Self {
        Status(bits)
    }

    /// Raw bits of this status.
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: Status) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    pub const fn intersects(self, other: Status) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.intersects(Status::EMPTY)
    }

    pub const fn is_ready(self) -> bool {
        self.intersects(Status::READY)
    }

    pub const fn is_destroyed(self) -> bool {
        self.intersects(Status::DESTROYED)
    }

    /// True while a remote operation on the record is in flight.
    pub const fn is_busy(self) -> bool {
        self.intersects(Status::BUSY)
    }

    pub const fn is_error(self) -> bool {
        self.intersects(Status::ERROR)
    }

    /// True for any state holding local edits not yet acknowledged remotely.
    pub const fn is_dirty(self) -> bool {
        self.0 == Status::READY_DIRTY.0
            || self.0 == Status::READY_NEW.0
            || self.0 == Status::DESTROYED_DIRTY.0
            || self.0 == Status::BUSY_REFRESH_DIRTY.0
    }

    /// Symbolic name of a known status code.
    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Status::CLEAN => "CLEAN",
            Status::DIRTY => "DIRTY",
            Status::EMPTY => "EMPTY",
            Status::ERROR => "ERROR",
            Status::READY => "READY",
            Status::READY_CLEAN => "READY_CLEAN",
            Status::READY_DIRTY => "READY_DIRTY",
            Status::READY_NEW => "READY_NEW",
            Status::DESTROYED => "DESTROYED",
            Status::DESTROYED_CLEAN => "DESTROYED_CLEAN",
            Status::DESTROYED_DIRTY => "DESTROYED_DIRTY",
            Status::BUSY => "BUSY",
            Status::BUSY_LOADING => "BUSY_LOADING",
            Status::BUSY_CREATING => "BUSY_CREATING",
            Status::BUSY_COMMITTING => "BUSY_COMMITTING",
            Status::BUSY_REFRESH => "BUSY_REFRESH",
            Status::BUSY_REFRESH_CLEAN => "BUSY_REFRESH_CLEAN",
            Status::BUSY_REFRESH_DIRTY => "BUSY_REFRESH_DIRTY",
            Status::BUSY_DESTROYING => "BUSY_DESTROYING",
            _ => return None,
        };
        Some(name)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::EMPTY
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}
