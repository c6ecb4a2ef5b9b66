pub mod clock;
pub mod error;
pub mod rate_limit;
pub mod traits;
pub mod types;

pub use clock::*;
pub use error::*;
pub use rate_limit::RateLimiter;
pub use traits::*;
pub use types::*;
