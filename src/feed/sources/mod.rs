//! Feed transport implementations (line protocol, REST polling)

mod line;
mod rest;

pub use line::LineProtocolCollector;
pub use rest::RestPollingCollector;
