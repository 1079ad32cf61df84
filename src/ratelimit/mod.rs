//! Rate limiting decisions and the records they are based on.

mod identifier;
mod limiter;
mod policy;

pub use identifier::{Identifier, BLOCK_PREFIX, COUNT_PREFIX, OVERRIDE_PREFIX};
pub use limiter::{RateLimiter, COUNT_WINDOW};
pub use policy::{LimitPolicy, OverrideRecord, PolicySource, COOLDOWN_FIELD, LIMIT_FIELD};
