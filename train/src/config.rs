use burn::prelude::Config;

use crate::error::TrainError;

/// Normalization layer used inside the generator and discriminators.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum NormKind {
    Instance,
    Batch,
}

/// Options of the coarse-to-fine generator and its multi-scale discriminators.
///
/// The networks themselves live behind [`crate::model::TranslationModel`]; this is the
/// typed set of options an implementation is built from.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Filters in the first generator conv layer.
    #[config(default = 64)]
    pub ngf: usize,

    #[config(default = 4)]
    pub n_downsample_global: usize,

    /// Residual blocks in the global generator.
    #[config(default = 9)]
    pub n_blocks_global: usize,

    /// Residual blocks per local enhancer.
    #[config(default = 3)]
    pub n_blocks_local: usize,

    #[config(default = 0)]
    pub n_local_enhancers: usize,

    #[config(default = "NormKind::Instance")]
    pub norm: NormKind,

    /// Keep dropout layers in the generator. Needed for Monte-Carlo sampling.
    #[config(default = false)]
    pub use_dropout: bool,

    #[config(default = 0.5)]
    pub dropout_rate: f64,

    /// Number of discriminators, each working at half the scale of the previous one.
    #[config(default = 2)]
    pub num_d: usize,

    #[config(default = 3)]
    pub n_layers_d: usize,

    /// Filters in the first discriminator conv layer.
    #[config(default = 64)]
    pub ndf: usize,

    /// Disable the discriminator feature matching loss.
    #[config(default = false)]
    pub no_gan_feat_loss: bool,

    /// Disable the perceptual loss.
    #[config(default = false)]
    pub no_vgg_loss: bool,

    /// Use the cross entropy GAN loss instead of least squares.
    #[config(default = false)]
    pub no_lsgan: bool,

    /// Weight of the feature matching and perceptual losses.
    #[config(default = 10.0)]
    pub lambda_feat: f64,

    #[config(default = 2e-4)]
    pub lr: f64,

    /// Adam momentum term.
    #[config(default = 0.5)]
    pub beta1: f64,
}

impl ModelConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.ngf == 0 || self.ndf == 0 {
            return Err(TrainError::Config("ngf and ndf must be positive".into()));
        }
        if self.num_d == 0 || self.n_layers_d == 0 {
            return Err(TrainError::Config(
                "num_d and n_layers_d must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(TrainError::Config(format!(
                "dropout_rate must lie in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(TrainError::Config(format!(
                "lr must be positive, got {}",
                self.lr
            )));
        }
        if !(0.0..1.0).contains(&self.beta1) {
            return Err(TrainError::Config(format!(
                "beta1 must lie in [0, 1), got {}",
                self.beta1
            )));
        }
        if self.lambda_feat < 0.0 {
            return Err(TrainError::Config("lambda_feat must not be negative".into()));
        }
        Ok(())
    }

    /// Loss terms an implementation with these options reports from its steps.
    pub fn loss_names(&self) -> Vec<&'static str> {
        use crate::msg::{D_FAKE, D_REAL, G_GAN, G_GAN_FEAT, G_VGG};

        let mut names = vec![D_REAL, D_FAKE, G_GAN];
        if !self.no_gan_feat_loss {
            names.push(G_GAN_FEAT);
        }
        if !self.no_vgg_loss {
            names.push(G_VGG);
        }
        names
    }
}

#[derive(Config, Debug)]
pub struct TrainConfig {
    /// Epochs at the base learning rate.
    #[config(default = 100)]
    pub niter: usize,

    /// Epochs over which the learning rate decays linearly to zero.
    #[config(default = 100)]
    pub niter_decay: usize,

    /// Save the `latest` snapshot every this many batches.
    #[config(default = 1000)]
    pub save_latest_freq: usize,

    /// Save a numbered snapshot every this many epochs.
    #[config(default = 10)]
    pub save_epoch_freq: usize,

    /// Log the running losses every this many batches.
    #[config(default = 100)]
    pub print_freq: usize,

    /// Data range the validation metrics are computed with.
    #[config(default = 1.0)]
    pub data_range: f32,
}

impl TrainConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.total_epochs() == 0 {
            return Err(TrainError::Config(
                "niter + niter_decay must be at least 1".into(),
            ));
        }
        if self.save_latest_freq == 0 || self.save_epoch_freq == 0 || self.print_freq == 0 {
            return Err(TrainError::Config(
                "save and print frequencies must be positive".into(),
            ));
        }
        if !(self.data_range > 0.0 && self.data_range.is_finite()) {
            return Err(TrainError::InvalidDataRange(self.data_range));
        }
        Ok(())
    }

    pub fn total_epochs(&self) -> usize {
        self.niter + self.niter_decay
    }

    /// Learning rate used during the (1-based) `epoch`.
    ///
    /// Constant for `niter` epochs, then reduced by `base / niter_decay` after every
    /// further epoch.
    pub fn learning_rate_at(&self, base: f64, epoch: usize) -> f64 {
        if epoch <= self.niter + 1 || self.niter_decay == 0 {
            return base;
        }
        let decayed = (epoch - self.niter - 1) as f64;
        (base * (1.0 - decayed / self.niter_decay as f64)).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_are_valid() {
        ModelConfig::new().validate().unwrap();
        TrainConfig::new().validate().unwrap();
    }

    #[test]
    fn rejects_bad_options() {
        assert!(ModelConfig::new().with_dropout_rate(1.0).validate().is_err());
        assert!(ModelConfig::new().with_num_d(0).validate().is_err());
        assert!(ModelConfig::new().with_lr(0.0).validate().is_err());
        assert!(
            TrainConfig::new()
                .with_niter(0)
                .with_niter_decay(0)
                .validate()
                .is_err()
        );
        assert!(matches!(
            TrainConfig::new().with_data_range(0.0).validate(),
            Err(TrainError::InvalidDataRange(_))
        ));
    }

    #[test]
    fn loss_toggles_drop_terms() {
        let names = ModelConfig::new()
            .with_no_vgg_loss(true)
            .loss_names();
        assert_eq!(names, vec!["D_real", "D_fake", "G_GAN", "G_GAN_Feat"]);
    }

    #[test]
    fn learning_rate_decays_linearly() {
        let config = TrainConfig::new().with_niter(2).with_niter_decay(4);
        let base = 1.0;
        assert_eq!(config.learning_rate_at(base, 1), 1.0);
        assert_eq!(config.learning_rate_at(base, 3), 1.0);
        assert_eq!(config.learning_rate_at(base, 4), 0.75);
        assert_eq!(config.learning_rate_at(base, 6), 0.25);
        assert_eq!(config.learning_rate_at(base, 10), 0.0);
    }
}
