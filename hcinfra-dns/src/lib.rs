//! The embedded resolver's config-contract boundary (§4.5, §6(b)): a
//! zone/view model generated by the DNS reconciler and parsed back by the
//! `dns` subcommand. Query processing itself is delegated to the embedded
//! resolver binary (§1, Non-goals).

pub mod corefile;

pub use corefile::{render, ParsedZone, StaticEntry, ZoneInput};
