//! Copy-on-write snapshot publishing for mirrorkit.
//!
//! A [`SnapshotHook`] keeps a mirror's data in a tree of immutable
//! `@<epoch>` snapshots and publishes a finished sync by swapping a symlink.
//! The state machine is generic over a [`SnapshotPrimitive`]; btrfs
//! subvolumes and juicefs-style directory clones are provided.

pub mod btrfs;
pub mod error;
pub mod hook;
pub mod juicefs;
pub mod layout;
pub mod naming;
pub mod primitive;
pub mod publish;
pub mod settings;

pub use btrfs::BtrfsPrimitive;
pub use error::SnapshotError;
pub use hook::{HookOptions, SnapshotHook};
pub use juicefs::JuicefsPrimitive;
pub use layout::SnapshotLayout;
pub use naming::SnapshotEntry;
pub use primitive::{LinkStyle, SnapshotPrimitive};
pub use settings::{FailurePolicy, Placement, SnapshotKind, SnapshotSettings};
