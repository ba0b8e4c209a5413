//! Refresh passes: fetch every active subscription's candidates, store them and
//! reconcile each subscriber's watermark.

mod delta;
mod driver;

pub use delta::{ReconcileOutcome, WatermarkEngine};
pub use driver::{PassReport, RefreshDriver};
pub(crate) use driver::feed_item_from_candidate;
