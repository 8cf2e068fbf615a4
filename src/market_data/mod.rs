// Market data module entrypoint
pub mod adapters;     // provider transports (HTTP)
pub mod client;       // rate limit + retry + pagination over a transport
pub mod normaliser;   // provider payloads -> canonical quotes
pub mod rate_limiter; // shared token bucket
pub mod retry;        // backoff policy
pub mod schema;       // field mapping + symbol aliases
