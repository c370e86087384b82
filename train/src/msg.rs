use std::collections::BTreeMap;

use dataset::Split;

/// Discriminator loss on real pairs.
pub const D_REAL: &str = "D_real";
/// Discriminator loss on generated pairs.
pub const D_FAKE: &str = "D_fake";
/// Generator adversarial loss.
pub const G_GAN: &str = "G_GAN";
/// Discriminator feature matching loss.
pub const G_GAN_FEAT: &str = "G_GAN_Feat";
/// Perceptual loss.
pub const G_VGG: &str = "G_VGG";

pub const LOSS_NAMES: [&str; 5] = [D_REAL, D_FAKE, G_GAN, G_GAN_FEAT, G_VGG];

/// Named scalar loss values of a single step. Ordered so logs are stable.
pub type LossTerms = BTreeMap<String, f32>;

#[derive(Clone, Debug, PartialEq)]
pub struct LossRecord {
    pub split: Split,
    pub step: usize,
    pub terms: LossTerms,
}

/// Sums loss terms of one split over one epoch.
#[derive(Debug)]
pub struct LossAccumulator {
    split: Split,
    sums: BTreeMap<String, (f64, usize)>,
    steps: usize,
}

impl LossAccumulator {
    pub fn new(split: Split) -> Self {
        Self {
            split,
            sums: BTreeMap::new(),
            steps: 0,
        }
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn add(&mut self, terms: &LossTerms) {
        self.steps += 1;
        for (name, &value) in terms {
            let entry = self.sums.entry(name.clone()).or_insert((0.0, 0));
            entry.0 += value as f64;
            entry.1 += 1;
        }
    }

    pub fn add_record(&mut self, record: &LossRecord) {
        debug_assert_eq!(record.split, self.split);
        self.add(&record.terms);
    }

    /// Mean of every term seen. Terms are averaged over the steps that reported them.
    pub fn reduce(self) -> EpochSummary {
        EpochSummary {
            split: self.split,
            steps: self.steps,
            means: self
                .sums
                .into_iter()
                .map(|(name, (sum, count))| (name, (sum / count as f64) as f32))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpochSummary {
    pub split: Split,
    pub steps: usize,
    pub means: LossTerms,
}

impl EpochSummary {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.means.get(name).copied()
    }
}
