//! Paid review sessions: slot pools, priced tickets and settlement.

mod engine;
mod pool;
mod pricing;
mod ticket;

pub use engine::{PriceChange, ReviewEngine};
pub use ticket::ReviewTicket;
