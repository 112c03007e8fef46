//! Session epochs and signed session tokens

mod epoch;
mod token;

pub use epoch::{EpochStatus, SessionEpochStore, EPOCH_KEY_PREFIX};
pub use token::{Claims, SessionTokenCodec, TokenPair, TokenType};
