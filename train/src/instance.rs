use std::cmp::Ordering;

use hashbrown::{HashMap, HashSet};
use image::DynamicImage;
use serde::Serialize;

use crate::error::{Result, TrainError};
use crate::stats::Summary;

/// Integer labelled segmentation, row-major. Label 0 is background, every other label is
/// one instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMask {
    width: usize,
    height: usize,
    labels: Vec<u32>,
}

impl LabelMask {
    pub fn new(width: usize, height: usize, labels: Vec<u32>) -> Result<Self> {
        if labels.len() != width * height {
            return Err(TrainError::ShapeMismatch(format!(
                "{} labels for a {width}x{height} mask",
                labels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            labels,
        })
    }

    /// Read labels from a single channel 8 or 16 bit image.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let labels = match image {
            DynamicImage::ImageLuma8(buf) => buf.as_raw().iter().map(|&v| v as u32).collect(),
            DynamicImage::ImageLuma16(buf) => buf.as_raw().iter().map(|&v| v as u32).collect(),
            other => {
                return Err(TrainError::UnsupportedMask(format!(
                    "expected 8 or 16 bit grayscale labels, got {:?}",
                    other.color()
                )));
            }
        };
        Self::new(width, height, labels)
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Number of distinct nonzero labels.
    pub fn instance_count(&self) -> usize {
        self.labels
            .iter()
            .filter(|&&l| l != 0)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Prediction and ground truth segmentation of one example.
#[derive(Clone, Debug)]
pub struct MaskPair {
    pub id: String,
    pub predicted: LabelMask,
    pub ground_truth: LabelMask,
}

/// Detection counts of one mask pair at one IoU threshold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchCounts {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Mean IoU over the matched pairs, 0 without matches.
    pub mean_iou: f32,
}

impl MatchCounts {
    pub fn precision(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_positives,
        )
    }

    pub fn recall(&self) -> f32 {
        ratio(
            self.true_positives,
            self.true_positives + self.false_negatives,
        )
    }

    pub fn f1(&self) -> f32 {
        let (p, r) = (self.precision(), self.recall());
        if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 }
    }
}

fn ratio(num: usize, denom: usize) -> f32 {
    if denom == 0 {
        0.0
    } else {
        num as f32 / denom as f32
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    predicted: u32,
    truth: u32,
    iou: f32,
}

/// Pairwise overlaps of the instances in a mask pair, computed once and matched at any threshold.
#[derive(Clone, Debug)]
pub struct Overlaps {
    predicted_count: usize,
    truth_count: usize,
    // Every overlapping (predicted, truth) pair, best IoU first.
    candidates: Vec<Candidate>,
}

impl Overlaps {
    pub fn new(predicted: &LabelMask, ground_truth: &LabelMask) -> Result<Self> {
        if predicted.dims() != ground_truth.dims() {
            return Err(TrainError::ShapeMismatch(format!(
                "predicted mask is {:?}, ground truth is {:?}",
                predicted.dims(),
                ground_truth.dims()
            )));
        }

        let mut predicted_area: HashMap<u32, u64> = HashMap::new();
        let mut truth_area: HashMap<u32, u64> = HashMap::new();
        let mut intersection: HashMap<(u32, u32), u64> = HashMap::new();
        for (&p, &t) in predicted.labels.iter().zip(&ground_truth.labels) {
            if p != 0 {
                *predicted_area.entry(p).or_default() += 1;
            }
            if t != 0 {
                *truth_area.entry(t).or_default() += 1;
            }
            if p != 0 && t != 0 {
                *intersection.entry((p, t)).or_default() += 1;
            }
        }

        let mut candidates: Vec<Candidate> = intersection
            .into_iter()
            .map(|((p, t), inter)| {
                let union = predicted_area[&p] + truth_area[&t] - inter;
                Candidate {
                    predicted: p,
                    truth: t,
                    iou: inter as f32 / union as f32,
                }
            })
            .collect();
        // Highest IoU first. Equal IoUs end up adjacent and are matched as one group.
        candidates.sort_by(|a, b| {
            b.iou
                .partial_cmp(&a.iou)
                .unwrap_or(Ordering::Equal)
                .then(a.truth.cmp(&b.truth))
                .then(a.predicted.cmp(&b.predicted))
        });

        Ok(Self {
            predicted_count: predicted_area.len(),
            truth_count: truth_area.len(),
            candidates,
        })
    }

    pub fn truth_count(&self) -> usize {
        self.truth_count
    }

    pub fn predicted_count(&self) -> usize {
        self.predicted_count
    }

    /// One-to-one matching: a pair is accepted when its IoU is at least `threshold` and
    /// neither instance is matched yet.
    ///
    /// Pairs with exactly equal IoU are matched together as one group, taking as many of them
    /// as a one-to-one assignment allows. The counts then do not depend on label values.
    pub fn match_at(&self, threshold: f32) -> Result<MatchCounts> {
        check_threshold(threshold)?;

        let mut used_predicted = HashSet::new();
        let mut used_truth = HashSet::new();
        let mut iou_sum = 0.0f64;
        for group in self.candidates.chunk_by(|a, b| a.iou == b.iou) {
            let iou = group[0].iou;
            if iou < threshold {
                break;
            }
            let open: Vec<(u32, u32)> = group
                .iter()
                .filter(|c| {
                    !used_predicted.contains(&c.predicted) && !used_truth.contains(&c.truth)
                })
                .map(|c| (c.predicted, c.truth))
                .collect();
            for (predicted, truth) in max_matching(&open) {
                used_predicted.insert(predicted);
                used_truth.insert(truth);
                iou_sum += iou as f64;
            }
        }

        let true_positives = used_predicted.len();
        Ok(MatchCounts {
            true_positives,
            false_positives: self.predicted_count - true_positives,
            false_negatives: self.truth_count - true_positives,
            mean_iou: if true_positives > 0 {
                (iou_sum / true_positives as f64) as f32
            } else {
                0.0
            },
        })
    }
}

fn check_threshold(threshold: f32) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(TrainError::InvalidThreshold(threshold))
    }
}

/// Maximum cardinality matching of `(predicted, truth)` edges, by augmenting paths.
fn max_matching(edges: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut adjacent: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(predicted, truth) in edges {
        adjacent.entry(predicted).or_default().push(truth);
    }

    let mut owner: HashMap<u32, u32> = HashMap::new();
    for &predicted in adjacent.keys() {
        let mut visited = HashSet::new();
        augment(predicted, &adjacent, &mut visited, &mut owner);
    }
    owner.into_iter().map(|(truth, predicted)| (predicted, truth)).collect()
}

fn augment(
    predicted: u32,
    adjacent: &HashMap<u32, Vec<u32>>,
    visited: &mut HashSet<u32>,
    owner: &mut HashMap<u32, u32>,
) -> bool {
    let Some(truths) = adjacent.get(&predicted) else {
        return false;
    };
    for &truth in truths {
        if !visited.insert(truth) {
            continue;
        }
        let free = match owner.get(&truth).copied() {
            None => true,
            Some(other) => augment(other, adjacent, visited, owner),
        };
        if free {
            owner.insert(truth, predicted);
            return true;
        }
    }
    false
}

/// One row of the instance metric table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstanceScore {
    #[serde(rename = "Model")]
    pub model: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "GT_Cell_Count")]
    pub gt_cell_count: usize,
    #[serde(rename = "Threshold")]
    pub threshold: f32,
    #[serde(rename = "F1")]
    pub f1: f32,
    #[serde(rename = "IoU")]
    pub iou: f32,
    #[serde(rename = "TP")]
    pub tp: usize,
    #[serde(rename = "FP")]
    pub fp: usize,
    #[serde(rename = "FN")]
    pub fn_: usize,
    #[serde(rename = "Precision")]
    pub precision: f32,
    #[serde(rename = "Recall")]
    pub recall: f32,
}

impl InstanceScore {
    fn new(
        model: &str,
        image: &str,
        gt_cell_count: usize,
        threshold: f32,
        counts: MatchCounts,
    ) -> Self {
        Self {
            model: model.to_string(),
            image: image.to_string(),
            gt_cell_count,
            threshold,
            f1: counts.f1(),
            iou: counts.mean_iou,
            tp: counts.true_positives,
            fp: counts.false_positives,
            fn_: counts.false_negatives,
            precision: counts.precision(),
            recall: counts.recall(),
        }
    }
}

/// Score one mask pair at one threshold.
pub fn score_pair(pair: &MaskPair, threshold: f32, model: &str) -> Result<InstanceScore> {
    let overlaps = Overlaps::new(&pair.predicted, &pair.ground_truth)?;
    let counts = overlaps.match_at(threshold)?;
    Ok(InstanceScore::new(
        model,
        &pair.id,
        overlaps.truth_count(),
        threshold,
        counts,
    ))
}

/// Score every pair at every threshold. Each threshold gets its own row set, in the order
/// the thresholds were given.
pub fn score_thresholds(
    pairs: &[MaskPair],
    thresholds: &[f32],
    model: &str,
) -> Result<Vec<Vec<InstanceScore>>> {
    for &threshold in thresholds {
        check_threshold(threshold)?;
    }
    let overlaps = pairs
        .iter()
        .map(|pair| Overlaps::new(&pair.predicted, &pair.ground_truth))
        .collect::<Result<Vec<_>>>()?;

    thresholds
        .iter()
        .map(|&threshold| -> Result<Vec<InstanceScore>> {
            pairs
                .iter()
                .zip(&overlaps)
                .map(|(pair, overlap)| -> Result<InstanceScore> {
                    let counts = overlap.match_at(threshold)?;
                    Ok(InstanceScore::new(
                        model,
                        &pair.id,
                        overlap.truth_count(),
                        threshold,
                        counts,
                    ))
                })
                .collect()
        })
        .collect()
}

/// Mean and standard deviation of F1 over one row set.
pub fn summarize_f1(rows: &[InstanceScore]) -> Summary {
    Summary::of(rows.iter().map(|r| r.f1))
}
