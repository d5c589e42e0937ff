//! A thread-safe token bucket.
//!
//! Tokens are credited lazily: every call works out how many whole refill
//! intervals have passed since the last credit and adds that many tokens
//! before doing anything else. Withdrawals never block; they either succeed
//! immediately or report that not enough tokens are available.
//!
//! ```
//! use std::time::Duration;
//! use token_bucket::TokenBucket;
//!
//! let bucket = TokenBucket::new(5, Duration::from_secs(1)).unwrap();
//! assert!(bucket.take());
//! assert_eq!(bucket.available_tokens(), 4);
//! assert!(!bucket.take_n(10));
//! ```

mod clock;
mod error;
mod token_bucket;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use token_bucket::{RefillPolicy, TokenBucket};
