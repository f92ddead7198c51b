use crate::error::Result;

/// A trained or trainable latent-factor recommender.
///
/// Object safe, so evaluation code can hold a `&dyn FactorizationModel` and
/// compare models side by side.
pub trait FactorizationModel {
    /// Run training to completion. A failure is fatal for the model.
    fn train(&mut self) -> Result<()>;

    /// Predicted rating of `item` by `user` (dense indices).
    fn predict(&self, user: usize, item: usize) -> f64;

    fn user_factors(&self, user: usize) -> &[f64];

    /// Item factors as seen by prediction.
    fn item_factors(&self, item: usize) -> &[f64];

    fn num_factors(&self) -> usize;

    fn lambda(&self) -> f64;

    fn gamma(&self) -> f64;
}
