use serde::Serialize;

/// Mean and spread of one metric column.
///
/// Non-finite values (undefined correlation, infinite PSNR) are kept out of the
/// mean and reported in `excluded`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub excluded: usize,
    pub mean: f32,
    /// Sample standard deviation, NaN with fewer than two finite values.
    pub std: f32,
}

impl Summary {
    pub fn of(values: impl IntoIterator<Item = f32>) -> Self {
        let mut finite = Vec::new();
        let mut excluded = 0;
        for value in values {
            if value.is_finite() {
                finite.push(value as f64);
            } else {
                excluded += 1;
            }
        }

        let count = finite.len();
        if count == 0 {
            return Self {
                count,
                excluded,
                mean: f32::NAN,
                std: f32::NAN,
            };
        }
        let mean = finite.iter().sum::<f64>() / count as f64;
        let std = if count > 1 {
            let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
            var.sqrt() as f32
        } else {
            f32::NAN
        };
        Self {
            count,
            excluded,
            mean: mean as f32,
            std,
        }
    }
}
