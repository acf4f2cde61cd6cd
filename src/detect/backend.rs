use anyhow::Result;

use crate::detect::result::Observation;
use crate::frame::Frame;

/// A loaded detection model.
///
/// `infer` takes `&self`: a model holds no state between calls, so running it
/// twice on the same frame yields the same observations for a deterministic model.
/// Implementations must not retain the frame beyond the call.
pub trait DetectionModel: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run one inference pass. Observations come back in the model's native order.
    fn infer(&self, frame: &Frame) -> Result<Vec<Observation>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
