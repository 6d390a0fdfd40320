//! Library surface shared by the `controller` and `crdgen` binaries: the
//! admission webhook (`admission`) and the per-subcommand entry points
//! (`cli`). Kept as a `lib.rs`/`main.rs` split so `crdgen` can pull in just
//! the CRD types without re-parsing CLI args.

pub mod admission;
pub mod cli;
