pub mod configuration;
pub mod credentials;
pub mod invoker;
pub mod logger;
pub mod rate_limiter;
pub mod settings;
pub mod url_guard;
pub mod usage;
pub mod validation;
pub mod vault;
pub mod webhook;
