//! The cooperative-async mirror of the whole strategy/storage surface
//! (§2 item 5, §5). One algorithm, two trait hierarchies.

pub mod memory;
pub mod registry;
pub mod storage;
pub mod strategies;
