//! Lua scripts for atomic circuit-breaker state transitions in Redis.
//!
//! Both scripts read the current state, mutate counters, optionally
//! transition state, and stamp `last_state_change` — all in one round trip,
//! so two concurrent callers can never observe the same pre-transition state.

/// `KEYS[1]` = breaker hash key, `ARGV[1]` = now (unix secs),
/// `ARGV[2]` = success_threshold.
///
/// Closed: resets failure_count to 0.
/// HalfOpen: increments success_count; transitions to Closed once it
/// reaches `success_threshold`.
pub const RECORD_SUCCESS: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local success_threshold = tonumber(ARGV[2])

local state = tonumber(redis.call('HGET', key, 'state') or '0')

if state == 2 then
  local success_count = redis.call('HINCRBY', key, 'success_count', 1)
  if success_count >= success_threshold then
    redis.call('HSET', key, 'state', 0, 'failure_count', 0, 'success_count', 0, 'last_state_change', now)
  end
else
  redis.call('HSET', key, 'state', 0, 'failure_count', 0)
end

return redis.call('HGET', key, 'state')
";

/// `KEYS[1]` = breaker hash key, `ARGV[1]` = now (unix secs),
/// `ARGV[2]` = failure_threshold.
///
/// Closed: increments failure_count; transitions to Open once it reaches
/// `failure_threshold`.
/// HalfOpen: any failure immediately transitions back to Open.
pub const RECORD_FAILURE: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local failure_threshold = tonumber(ARGV[2])

local state = tonumber(redis.call('HGET', key, 'state') or '0')

redis.call('HSET', key, 'last_failure_time', now)

if state == 2 then
  redis.call('HSET', key, 'state', 1, 'success_count', 0, 'last_state_change', now)
else
  local failure_count = redis.call('HINCRBY', key, 'failure_count', 1)
  if failure_count >= failure_threshold then
    redis.call('HSET', key, 'state', 1, 'last_state_change', now)
  end
end

return redis.call('HGET', key, 'state')
";
