//! Transaction submission module with nonce serialization and gas pricing

mod gas;
mod nonce;
mod sender;

pub use gas::{GasPrice, GasPricer};
pub use nonce::{NonceGuard, NonceManager};
pub use sender::TransactionSender;
