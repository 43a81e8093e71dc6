//! Snowflake identity generator
//!
//! 41 bits of milliseconds since `EPOCH_MS`, 10 bits of node, 12 bits of
//! per-millisecond sequence.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// 2020-01-01T00:00:00Z
pub const EPOCH_MS: i64 = 1_577_836_800_000;

const NODE_BITS: u32 = 10;
const SEQ_BITS: u32 = 12;
const MAX_NODE: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQ: i64 = (1 << SEQ_BITS) - 1;

pub struct Snowflake {
    node: i64,
    state: Mutex<(i64, i64)>,
}

impl Snowflake {
    /// Node ids wrap into the 10-bit range.
    pub fn new(node: i64) -> Self {
        Self {
            node: node & MAX_NODE,
            state: Mutex::new((0, 0)),
        }
    }

    pub fn next_id(&self) -> i64 {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (last, seq) = *state;
        let mut now = now_ms();
        if now < last {
            now = last;
        }
        let seq = if now == last {
            let next = (seq + 1) & MAX_SEQ;
            if next == 0 {
                while now <= last {
                    std::thread::yield_now();
                    now = now_ms();
                }
            }
            next
        } else {
            0
        };
        *state = (now, seq);
        ((now - EPOCH_MS) << (NODE_BITS + SEQ_BITS)) | (self.node << SEQ_BITS) | seq
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(EPOCH_MS)
}

/// Next id from the shared generator of `node`.
pub fn next_id(node: i64) -> i64 {
    static GENERATORS: OnceLock<Mutex<HashMap<i64, &'static Snowflake>>> = OnceLock::new();
    let generators = GENERATORS.get_or_init(|| Mutex::new(HashMap::new()));
    let generator = {
        let mut map = match generators.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *map.entry(node & MAX_NODE)
            .or_insert_with(|| Box::leak(Box::new(Snowflake::new(node))))
    };
    generator.next_id()
}
