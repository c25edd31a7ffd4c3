//! Server-side Lua scripts. Every multi-step operation the storage contract
//! requires atomicity for runs as a single script instead of a
//! `WATCH`/`MULTI`/`EXEC` transaction, matching the approach the original
//! redis driver this crate's semantics are modeled on takes.
//!
//! `redis::Script::invoke` already does the `EVALSHA` first, `EVAL` on
//! `NOSCRIPT` fallback dance and caches the resulting sha, so there is no
//! manual script-cache bookkeeping here.

use once_cell::sync::Lazy;
use redis::Script;

const INCR_EXPIRE: &str = r#"
local current = redis.call('INCRBY', KEYS[1], ARGV[2])
if tonumber(current) == tonumber(ARGV[2]) then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return current
"#;

const MOVING_WINDOW: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1])
local items = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
local count = redis.call('ZCARD', KEYS[1])
if #items == 2 then
    return {items[2], count}
end
return nil
"#;

const ACQUIRE_MOVING_WINDOW: &str = r#"
local now = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local expiry = tonumber(ARGV[3])
local amount = tonumber(ARGV[4])
local token = ARGV[5]
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, now - expiry)
local count = redis.call('ZCARD', KEYS[1])
if count + amount > limit then
    return 0
end
for i = 1, amount do
    redis.call('ZADD', KEYS[1], now, token .. ':' .. i)
end
redis.call('EXPIRE', KEYS[1], expiry)
return 1
"#;

const CLEAR_KEYS: &str = r#"
local cursor = '0'
local deleted = 0
repeat
    local result = redis.call('SCAN', cursor, 'MATCH', ARGV[1], 'COUNT', 5000)
    cursor = result[1]
    local keys = result[2]
    if #keys > 0 then
        deleted = deleted + redis.call('DEL', unpack(keys))
    end
until cursor == '0'
return deleted
"#;

const GET_SLIDING_WINDOW: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local current_ttl = redis.call('PTTL', KEYS[1])
local previous = tonumber(redis.call('GET', KEYS[2]) or '0')
local previous_ttl = redis.call('PTTL', KEYS[2])
if current_ttl < 0 then current_ttl = 0 end
if previous_ttl < 0 then previous_ttl = 0 end
return {previous, previous_ttl, current, current_ttl}
"#;

const ACQUIRE_SLIDING_WINDOW: &str = r#"
local limit = tonumber(ARGV[1])
local expiry_ms = tonumber(ARGV[2])
local amount = tonumber(ARGV[3])
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local current_ttl = redis.call('PTTL', KEYS[1])
local previous = tonumber(redis.call('GET', KEYS[2]) or '0')
local previous_ttl = redis.call('PTTL', KEYS[2])
if current_ttl < 0 then current_ttl = 0 end
if previous_ttl < 0 then previous_ttl = 0 end
local weighted = math.floor(previous * previous_ttl / expiry_ms) + current
if weighted + amount > limit then
    return 0
end
local value = redis.call('INCRBY', KEYS[1], amount)
if value == amount then
    redis.call('PEXPIRE', KEYS[1], expiry_ms * 2)
end
return 1
"#;

const CLEAR_SLIDING_WINDOW: &str = r#"
redis.call('DEL', KEYS[1], KEYS[2])
return 1
"#;

pub static INCR_EXPIRE_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(INCR_EXPIRE));
pub static MOVING_WINDOW_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(MOVING_WINDOW));
pub static ACQUIRE_MOVING_WINDOW_SCRIPT: Lazy<Script> =
    Lazy::new(|| Script::new(ACQUIRE_MOVING_WINDOW));
pub static CLEAR_KEYS_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(CLEAR_KEYS));
pub static GET_SLIDING_WINDOW_SCRIPT: Lazy<Script> = Lazy::new(|| Script::new(GET_SLIDING_WINDOW));
pub static ACQUIRE_SLIDING_WINDOW_SCRIPT: Lazy<Script> =
    Lazy::new(|| Script::new(ACQUIRE_SLIDING_WINDOW));
pub static CLEAR_SLIDING_WINDOW_SCRIPT: Lazy<Script> =
    Lazy::new(|| Script::new(CLEAR_SLIDING_WINDOW));
