use std::path::Path;

use burn::prelude::Backend;
use burn::tensor::Tensor;
use dataset::StainBatch;

use crate::msg::LossTerms;

/// Which half of the adversarial pair an optimization step updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Network {
    Discriminator,
    Generator,
}

/// Result of a forward pass on a validation batch.
#[derive(Clone, Debug)]
pub struct ValidationOutput<B: Backend> {
    /// Generated images, `[N, H, W, C]`.
    pub prediction: Tensor<B, 4>,
    pub losses: LossTerms,
}

/// Capability interface of a conditional image translation model.
///
/// Implementations own their parameters and optimizer state. Only
/// [`TranslationModel::optimize_step`] may change them, every other operation is a read.
pub trait TranslationModel<B: Backend> {
    /// Translate a `[N, H, W, C_in]` source batch into a `[N, H, W, C_out]` prediction.
    fn forward(&self, source: Tensor<B, 4>) -> anyhow::Result<Tensor<B, 4>>;

    /// Forward pass and loss evaluation without any parameter update.
    fn validation_step(&self, batch: &StainBatch<B>) -> anyhow::Result<ValidationOutput<B>>;

    /// Forward, loss, backward and optimizer step for one network.
    fn optimize_step(&mut self, network: Network, batch: &StainBatch<B>)
    -> anyhow::Result<LossTerms>;

    /// Write all networks and optimizer state to `path`.
    fn save(&self, path: &Path) -> anyhow::Result<()>;

    fn load(&mut self, path: &Path) -> anyhow::Result<()>;

    /// Keep dropout active during [`TranslationModel::forward`].
    fn set_stochastic_inference(&mut self, enabled: bool);

    fn stochastic_inference(&self) -> bool;

    fn set_learning_rate(&mut self, _lr: f64) {}
}
