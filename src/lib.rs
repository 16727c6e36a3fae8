//! Workspace umbrella crate for the PokéProtocol peer suite.
//!
//! The root package exists to host the cross-endpoint integration suites in
//! `tests/integration/`; the implementation lives in the member crates:
//!
//! - `pb-protocol` — wire codec (message sum type, text frame serialize/parse)
//! - `pb-data` — creature and move stores
//! - `pb-engine` — deterministic damage calculator and battle state machine
//! - `peer` — reliability layer, endpoint runtime, chat subchannel
//! - `pb-test-utils` — in-process peer harness and lossy-relay helpers
