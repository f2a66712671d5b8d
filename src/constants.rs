pub mod network {
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const TIMEOUT_MAX_MS: u64 = 120_000;
    pub const TIMEOUT_MIN_MS: u64 = 1;
    pub const MAX_RETRIES: u32 = 10;
    pub const USER_AGENT: &str = concat!("callgate/", env!("CARGO_PKG_VERSION"));
}

pub mod rate_limit {
    pub const WINDOW_MS: i64 = 60_000;
    pub const DEFAULT_PER_MINUTE: u32 = 60;
    pub const MAX_PER_MINUTE: u32 = 10_000;
}

pub mod buffers {
    pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;
    pub const MAX_ERROR_MESSAGE_BYTES: usize = 1_024;
    pub const CRYPTO_KEY_SIZE: usize = 32;
    pub const CRYPTO_IV_SIZE: usize = 12;
    pub const CRYPTO_TAG_SIZE: usize = 16;
}

pub mod security {
    pub const BLOCKED_HOSTNAMES: &[&str] = &[
        "localhost",
        "metadata.google.internal",
        "metadata.goog",
        "metadata",
        "instance-data",
        "169.254.169.254",
    ];
    pub const PUBLIC_REJECTION_MESSAGE: &str = "Request blocked for security reasons";
}

pub mod protocols {
    pub const ALLOWED_HTTP: &[&str] = &["http", "https"];
}

pub mod auth {
    pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";
    pub const DEFAULT_API_KEY_QUERY: &str = "api_key";
}

pub mod webhook {
    pub const SIGNATURE_HEADERS: &[&str] = &[
        "x-webhook-signature",
        "x-signature-256",
        "x-hub-signature-256",
    ];
    pub const SIGNATURE_PREFIX: &str = "sha256=";
    pub const PATH_PREFIX: &str = "wh_";
    pub const PATH_RANDOM_BYTES: usize = 24;
    pub const SECRET_PREFIX: &str = "whsec_";
    pub const SECRET_RANDOM_BYTES: usize = 32;
    pub const STEP_ID: &str = "webhook";
    pub const DEFAULT_DELIVERY_LIMIT: usize = 50;
}

pub mod usage {
    pub const MAX_WINDOW_HOURS: u32 = 24 * 90;
    pub const DEFAULT_WINDOW_HOURS: u32 = 24;
}
