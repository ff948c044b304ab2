pub mod alpha_vantage;
pub mod rate_limiter;
pub mod registry;
pub mod sheet_universe;
pub mod twelve_data;
pub mod util;
pub mod yahoo_finance;

pub use rate_limiter::{RateLimit, RateLimiter};
pub use registry::build_routes;
