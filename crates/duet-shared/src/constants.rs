/// Default identity names (the original two-user deployment).
pub const DEFAULT_IDENTITY_A: &str = "Rav";
pub const DEFAULT_IDENTITY_B: &str = "Mon";

/// Maximum message attachment size in bytes (5 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 5 * 1024 * 1024;

/// Maximum profile image size in bytes (2 MiB)
pub const MAX_PROFILE_IMAGE_SIZE: usize = 2 * 1024 * 1024;

/// How long a call may stay ringing before it is torn down (seconds)
pub const DEFAULT_RING_TIMEOUT_SECS: u64 = 60;

/// Default WebSocket/HTTP listen port
pub const DEFAULT_PORT: u16 = 3000;

/// Maximum size of a single WebSocket frame in bytes.
///
/// Must fit a base64-encoded maximum attachment plus JSON framing:
/// 5 MiB * 4/3 is just under 7 MiB, so 8 MiB leaves headroom.
pub const MAX_WS_FRAME_SIZE: usize = 8 * 1024 * 1024;
