mod ledger;
mod schema;

pub use ledger::Ledger;
