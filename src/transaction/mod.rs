pub mod amount;
pub mod model;

pub use amount::Amount;
pub use model::{COINBASE, GENESIS, Transaction, is_valid_address};
