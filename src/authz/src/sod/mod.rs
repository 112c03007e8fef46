//! Static separation-of-duty enforcement

mod enforcer;

pub use enforcer::SodEnforcer;
