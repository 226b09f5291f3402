#![allow(dead_code)]

pub mod builders;
pub mod ledger_fixtures;
pub mod strategies;

pub use builders::*;
pub use ledger_fixtures::*;
