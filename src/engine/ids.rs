//! Transaction id generation
//!
//! Snowflake-style ids so that two clients opening negotiations against the
//! same backend do not collide.

use chrono::Utc;

use crate::negotiation::TransactionId;

/// Layout: timestamp millis (41 bits) | node id (8 bits) | sequence (15 bits)
pub struct IdGenerator {
    node_id: u8,
    sequence: u32,
    last_timestamp: u64,
}

impl IdGenerator {
    pub fn new(node_id: u8) -> Self {
        Self {
            node_id,
            sequence: 0,
            last_timestamp: 0,
        }
    }

    pub fn next_id(&mut self) -> TransactionId {
        let mut now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);

        // Clock went backwards: stay on the last timestamp
        if now < self.last_timestamp {
            now = self.last_timestamp;
        }

        if now == self.last_timestamp {
            self.sequence += 1;
            if self.sequence > 0x7FFF {
                // Sequence exhausted for this millisecond, borrow the next one
                now += 1;
                self.sequence = 0;
            }
        } else {
            self.sequence = 0;
        }
        self.last_timestamp = now;

        TransactionId::new((now << 23) | ((self.node_id as u64) << 15) | (self.sequence as u64 & 0x7FFF))
    }
}
