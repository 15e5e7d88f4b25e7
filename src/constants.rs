// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 7007;

// Token bucket defaults
pub const DEFAULT_BUCKET_LIMIT: u32 = 10;
pub const DEFAULT_REFILL_RATE: u32 = 1;
pub const DEFAULT_REFILL_INTERVAL_MS: u64 = 1000;

// Channel lifecycle defaults
pub const DEFAULT_CHANNEL_SWEEP_SECS: u64 = 5 * 60;
pub const DEFAULT_CHANNEL_INACTIVITY_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_CHANNEL_CAPACITY: u32 = 10;

// Connection handling defaults
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 3;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4096;

// History
pub const HISTORY_REPLY_LIMIT: usize = 200;
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;
