// Cross-chain atomic-swap coordination library.
//
// The coordinator locks value on a source chain behind a hash-lock,
// releases equivalent value on a destination chain by revealing the
// matching secret, and reconciles receipt state for both legs into a
// durable swap record.

pub mod config;
pub mod cross_chain;
pub mod data_structures;
pub mod hashlock;
pub mod onchain;
pub mod registry;
