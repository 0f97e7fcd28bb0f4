pub mod run;
pub mod snapshots;
