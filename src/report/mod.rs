// Session persistence: the final text report and the per-trial safety
// snapshot.

pub mod snapshot;
pub mod writer;

pub use snapshot::TempSnapshot;
pub use writer::write_report;
